//! Tabular source trait definition.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::errors::ServiceError;
use vector_indexer_shared::RawRecord;

/// Lazily produced rows of a query. `Err` items are mid-stream failures.
pub type RowStream = BoxStream<'static, Result<RawRecord, ServiceError>>;

/// Abstract interface for a queryable table store.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` to allow use across async tasks.
#[async_trait]
pub trait TabularSource: Send + Sync {
    /// Open a lazy stream over the rows of `table` matching `filter`.
    ///
    /// # Arguments
    ///
    /// * `table` - Table name
    /// * `filter` - Filter predicate; an empty string selects every row
    ///
    /// # Returns
    ///
    /// * `Ok(RowStream)` - Rows in a stable order, so a reopened stream yields
    ///   the same sequence
    /// * `Err(ServiceError::InvalidRequest)` - If the filter cannot be parsed
    /// * `Err(ServiceError)` - If the store cannot be reached
    async fn query(&self, table: &str, filter: &str) -> Result<RowStream, ServiceError>;
}
