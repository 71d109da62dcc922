use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::RwLock;

use crate::errors::ServiceError;
use crate::interfaces::{RowStream, TabularSource};
use crate::predicate::Predicate;
use vector_indexer_shared::RawRecord;

/// Tables held in memory.
#[derive(Default)]
pub struct InMemorySource {
    tables: RwLock<HashMap<String, Vec<RawRecord>>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rows to a table, creating it if needed.
    pub async fn insert_rows(&self, table: &str, rows: impl IntoIterator<Item = RawRecord>) {
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }
}

#[async_trait]
impl TabularSource for InMemorySource {
    async fn query(&self, table: &str, filter: &str) -> Result<RowStream, ServiceError> {
        let predicate = Predicate::parse(filter)?;
        let tables = self.tables.read().await;
        let rows = tables
            .get(table)
            .ok_or_else(|| ServiceError::not_found(format!("table '{}'", table)))?;

        let selected: Vec<Result<RawRecord, ServiceError>> = rows
            .iter()
            .filter(|row| predicate.matches(row))
            .cloned()
            .map(Ok)
            .collect();
        Ok(stream::iter(selected).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_query_filters_rows() {
        let source = InMemorySource::new();
        source
            .insert_rows(
                "courses",
                (0..4).filter_map(|i| {
                    let level = if i % 2 == 0 { "Beginner" } else { "Advanced" };
                    json!({"id": i, "level": level}).as_object().cloned()
                }),
            )
            .await;

        let rows: Vec<_> = source
            .query("courses", "level = 'Beginner'")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].as_ref().unwrap()["id"], json!(2));
    }

    #[tokio::test]
    async fn test_unknown_table_and_bad_filter() {
        let source = InMemorySource::new();
        source.insert_rows("courses", Vec::new()).await;

        assert!(matches!(
            source.query("missing", "").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            source.query("courses", "level ==").await,
            Err(ServiceError::InvalidRequest(_))
        ));
    }
}
