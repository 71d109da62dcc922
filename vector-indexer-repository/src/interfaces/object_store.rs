//! Object store trait definition.

use async_trait::async_trait;

use crate::errors::ServiceError;
use crate::types::ObjectUri;

/// Abstract interface for a bucket/prefix object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object in one step. Readers never observe a partial object.
    ///
    /// # Arguments
    ///
    /// * `uri` - Object location
    /// * `bytes` - Full object content
    /// * `overwrite` - Replace an existing object; when `false` an existing
    ///   object yields `ServiceError::AlreadyExists`
    async fn put(&self, uri: &ObjectUri, bytes: Vec<u8>, overwrite: bool)
        -> Result<(), ServiceError>;

    /// Read a full object.
    async fn get(&self, uri: &ObjectUri) -> Result<Vec<u8>, ServiceError>;

    /// List objects under a prefix, sorted by path.
    async fn list(&self, prefix: &ObjectUri) -> Result<Vec<ObjectUri>, ServiceError>;

    /// Whether an object exists.
    async fn exists(&self, uri: &ObjectUri) -> Result<bool, ServiceError>;
}
