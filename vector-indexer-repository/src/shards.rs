//! Reading newline-delimited datapoint shards.

use serde::de::DeserializeOwned;

use crate::errors::ServiceError;
use crate::interfaces::ObjectStore;
use crate::types::ObjectUri;
use vector_indexer_shared::Datapoint;

/// Decode one JSON record per non-blank line.
pub fn parse_lines<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, ServiceError> {
    let text = std::str::from_utf8(bytes).map_err(|e| ServiceError::serialization(e.to_string()))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(ServiceError::from))
        .collect()
}

/// Load every datapoint stored under `prefix`.
///
/// Returns the files found (sorted by path) together with their datapoints.
/// An empty prefix yields `ServiceError::InvalidRequest`.
pub async fn load_prefix(
    store: &dyn ObjectStore,
    prefix: &ObjectUri,
) -> Result<(Vec<ObjectUri>, Vec<Datapoint>), ServiceError> {
    let files = store.list(prefix).await?;
    if files.is_empty() {
        return Err(ServiceError::invalid_request(format!("no files under {}", prefix)));
    }

    let mut datapoints = Vec::new();
    for file in &files {
        let bytes = store.get(file).await?;
        datapoints.extend(parse_lines::<Datapoint>(&bytes)?);
    }
    Ok((files, datapoints))
}
