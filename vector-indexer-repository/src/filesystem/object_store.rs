use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::interfaces::ObjectStore;
use crate::types::ObjectUri;

const TEMP_MARKER: &str = ".tmp-";

/// Object store rooted at a local directory; each bucket is a subdirectory.
pub struct FileSystemObjectStore {
    root: PathBuf,
}

impl FileSystemObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, uri: &ObjectUri) -> PathBuf {
        let mut path = self.root.join(&uri.bucket);
        for segment in uri.path.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    fn uri_for(&self, bucket: &str, bucket_root: &Path, path: &Path) -> Option<ObjectUri> {
        let relative = path.strip_prefix(bucket_root).ok()?;
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(ObjectUri::new(bucket, segments.join("/")))
    }
}

#[async_trait]
impl ObjectStore for FileSystemObjectStore {
    async fn put(&self, uri: &ObjectUri, bytes: Vec<u8>, overwrite: bool) -> Result<(), ServiceError> {
        let target = self.path_for(uri);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ServiceError::invalid_request(format!("not an object path: {}", uri)))?;
        let temp = target.with_file_name(format!("{}{}{}", file_name, TEMP_MARKER, Uuid::new_v4()));
        fs::write(&temp, &bytes).await?;

        // Readers see either the old object or the complete new one.
        let published = if overwrite {
            fs::rename(&temp, &target).await
        } else {
            fs::hard_link(&temp, &target).await
        };
        if !overwrite || published.is_err() {
            let _ = fs::remove_file(&temp).await;
        }

        match published {
            Ok(()) => {
                debug!(uri = %uri, bytes = bytes.len(), "Wrote object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(ServiceError::AlreadyExists(uri.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, uri: &ObjectUri) -> Result<Vec<u8>, ServiceError> {
        fs::read(self.path_for(uri)).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ServiceError::not_found(uri.to_string()),
            _ => e.into(),
        })
    }

    async fn list(&self, prefix: &ObjectUri) -> Result<Vec<ObjectUri>, ServiceError> {
        let bucket_root = self.root.join(&prefix.bucket);
        let mut pending = vec![self.path_for(prefix)];
        let mut found = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if !entry.file_name().to_string_lossy().contains(TEMP_MARKER) {
                    if let Some(uri) = self.uri_for(&prefix.bucket, &bucket_root, &path) {
                        found.push(uri);
                    }
                }
            }
        }

        found.sort();
        Ok(found)
    }

    async fn exists(&self, uri: &ObjectUri) -> Result<bool, ServiceError> {
        Ok(fs::try_exists(self.path_for(uri)).await?)
    }
}
