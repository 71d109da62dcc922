use std::path::PathBuf;

use async_trait::async_trait;
use futures::{future, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;

use crate::errors::ServiceError;
use crate::interfaces::{RowStream, TabularSource};
use crate::predicate::Predicate;
use vector_indexer_shared::RawRecord;

/// Tables stored as `<root>/<table>.jsonl`, one JSON object per line.
///
/// Rows are read lazily, so tables larger than memory can be streamed.
pub struct JsonLinesSource {
    root: PathBuf,
}

impl JsonLinesSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn decode(line: std::io::Result<String>) -> Option<Result<RawRecord, ServiceError>> {
    match line {
        Ok(line) if line.trim().is_empty() => None,
        Ok(line) => Some(serde_json::from_str::<RawRecord>(&line).map_err(ServiceError::from)),
        Err(e) => Some(Err(e.into())),
    }
}

#[async_trait]
impl TabularSource for JsonLinesSource {
    async fn query(&self, table: &str, filter: &str) -> Result<RowStream, ServiceError> {
        if table.is_empty() || table.contains(['/', '\\']) || table.contains("..") {
            return Err(ServiceError::invalid_request(format!("bad table name '{}'", table)));
        }
        let predicate = Predicate::parse(filter)?;
        let path = self.root.join(format!("{}.jsonl", table));
        let file = File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ServiceError::not_found(format!("table '{}'", table)),
            _ => e.into(),
        })?;

        let rows = LinesStream::new(BufReader::new(file).lines())
            .filter_map(|line| future::ready(decode(line)))
            .filter(move |row| {
                future::ready(match row {
                    Ok(row) => predicate.matches(row),
                    Err(_) => true,
                })
            });
        Ok(rows.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_streams_matching_rows() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("courses.jsonl"),
            "{\"id\":1,\"level\":\"Beginner\"}\n\n{\"id\":2,\"level\":\"Advanced\"}\nnot json\n",
        )
        .unwrap();

        let source = JsonLinesSource::new(dir.path());
        let rows: Vec<_> = source
            .query("courses", "level = 'Beginner'")
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].as_ref().unwrap()["id"], serde_json::json!(1));
        assert!(matches!(rows[1], Err(ServiceError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_missing_table() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonLinesSource::new(dir.path());
        assert!(matches!(source.query("nope", "").await, Err(ServiceError::NotFound(_))));
        assert!(matches!(
            source.query("../etc", "").await,
            Err(ServiceError::InvalidRequest(_))
        ));
    }
}
