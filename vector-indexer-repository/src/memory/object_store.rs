use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::ServiceError;
use crate::interfaces::ObjectStore;
use crate::types::ObjectUri;

/// Objects held in memory, keyed by URI.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<ObjectUri, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, uri: &ObjectUri, bytes: Vec<u8>, overwrite: bool) -> Result<(), ServiceError> {
        let mut objects = self.objects.write().await;
        if !overwrite && objects.contains_key(uri) {
            return Err(ServiceError::AlreadyExists(uri.to_string()));
        }
        objects.insert(uri.clone(), bytes);
        Ok(())
    }

    async fn get(&self, uri: &ObjectUri) -> Result<Vec<u8>, ServiceError> {
        self.objects
            .read()
            .await
            .get(uri)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(uri.to_string()))
    }

    async fn list(&self, prefix: &ObjectUri) -> Result<Vec<ObjectUri>, ServiceError> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|uri| uri.is_under(prefix))
            .cloned()
            .collect())
    }

    async fn exists(&self, uri: &ObjectUri) -> Result<bool, ServiceError> {
        Ok(self.objects.read().await.contains_key(uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_respects_overwrite_flag() {
        let store = InMemoryObjectStore::new();
        let uri: ObjectUri = "gs://bucket/run/data/part-00000.json".parse().unwrap();

        store.put(&uri, b"one".to_vec(), false).await.unwrap();
        let err = store.put(&uri, b"two".to_vec(), false).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyExists(_)));
        assert_eq!(store.get(&uri).await.unwrap(), b"one".to_vec());

        store.put(&uri, b"two".to_vec(), true).await.unwrap();
        assert_eq!(store.get(&uri).await.unwrap(), b"two".to_vec());
    }

    #[tokio::test]
    async fn test_list_is_prefix_scoped() {
        let store = InMemoryObjectStore::new();
        for path in ["gs://b/run-1/data/a", "gs://b/run-1/data/b", "gs://b/run-10/data/a"] {
            store.put(&path.parse().unwrap(), Vec::new(), true).await.unwrap();
        }

        let listed = store.list(&"gs://b/run-1".parse().unwrap()).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(!store.exists(&"gs://b/run-2/x".parse().unwrap()).await.unwrap());
    }
}
