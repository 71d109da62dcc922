//! Request and response types shared by the collaborator interfaces.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ServiceError;
use vector_indexer_shared::{Restrict, SparseVector};

/// Scheme accepted for object-store URIs.
pub const OBJECT_URI_SCHEME: &str = "gs://";

/// Location of an object or prefix in the object store, `gs://bucket/path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectUri {
    /// Bucket name.
    pub bucket: String,
    /// Object path inside the bucket, without leading or trailing slashes.
    pub path: String,
}

impl ObjectUri {
    /// Create a URI from its parts.
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into().trim_matches('/').to_string(),
        }
    }

    /// Append path segments.
    pub fn join(&self, segment: &str) -> Self {
        let segment = segment.trim_matches('/');
        let path = if self.path.is_empty() {
            segment.to_string()
        } else if segment.is_empty() {
            self.path.clone()
        } else {
            format!("{}/{}", self.path, segment)
        };
        Self {
            bucket: self.bucket.clone(),
            path,
        }
    }

    /// Whether this object lives under `prefix` (treated as a directory).
    pub fn is_under(&self, prefix: &ObjectUri) -> bool {
        self.bucket == prefix.bucket
            && (prefix.path.is_empty() || self.path.starts_with(&format!("{}/", prefix.path)))
    }

    /// Final path segment.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

impl FromStr for ObjectUri {
    type Err = ServiceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let remainder = value.strip_prefix(OBJECT_URI_SCHEME).ok_or_else(|| {
            ServiceError::invalid_request(format!(
                "object URI must start with {}: {}",
                OBJECT_URI_SCHEME, value
            ))
        })?;
        let (bucket, path) = remainder.split_once('/').unwrap_or((remainder, ""));
        if bucket.is_empty() {
            return Err(ServiceError::invalid_request(format!(
                "object URI has no bucket: {}",
                value
            )));
        }
        Ok(Self::new(bucket, path))
    }
}

impl fmt::Display for ObjectUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}{}", OBJECT_URI_SCHEME, self.bucket)
        } else {
            write!(f, "{}{}/{}", OBJECT_URI_SCHEME, self.bucket, self.path)
        }
    }
}

/// Result of a batch operation for a single datapoint.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOperationResult {
    /// The datapoint identifier.
    pub id: String,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error if the operation failed.
    pub error: Option<ServiceError>,
}

impl BatchOperationResult {
    /// A successful result.
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: true,
            error: None,
        }
    }

    /// A failed result.
    pub fn failed(id: impl Into<String>, error: ServiceError) -> Self {
        Self {
            id: id.into(),
            success: false,
            error: Some(error),
        }
    }
}

/// Summary of a batch operation containing aggregate statistics and individual results.
///
/// Whole-call failures are reported through the `Err` side of the call; this
/// summary only describes calls the service accepted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchOperationSummary {
    /// Total number of datapoints in the batch.
    pub total: usize,
    /// Number of successful operations.
    pub succeeded: usize,
    /// Number of failed operations.
    pub failed: usize,
    /// Individual results for each datapoint.
    pub results: Vec<BatchOperationResult>,
}

impl BatchOperationSummary {
    /// Build a summary from per-datapoint results.
    pub fn from_results(results: Vec<BatchOperationResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }

    /// Iterate over failed results.
    pub fn failures(&self) -> impl Iterator<Item = &BatchOperationResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

/// Handle for a batch ingestion accepted by the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchUpdateOperation {
    /// Operation identifier assigned by the index.
    pub operation_id: String,
    /// Prefix the index ingests from.
    pub contents_uri: String,
    /// Files found under the prefix.
    pub files: Vec<String>,
    /// Whether the index content is replaced by the prefix content.
    pub complete_overwrite: bool,
    /// When the index accepted the operation.
    pub started_at: DateTime<Utc>,
}

/// Categorical filter applied to a neighbor search.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NamespaceFilter {
    /// Restrict namespace.
    #[serde(alias = "name")]
    pub namespace: String,
    /// Datapoints must carry one of these tokens.
    #[serde(default, alias = "allow_list", alias = "allow_tokens")]
    pub allow: Vec<String>,
    /// Datapoints carrying one of these tokens are excluded.
    #[serde(default, alias = "deny_list", alias = "deny_tokens")]
    pub deny: Vec<String>,
}

impl NamespaceFilter {
    /// Allow-list filter on one namespace.
    pub fn allow(namespace: impl Into<String>, allow: Vec<String>) -> Self {
        Self {
            namespace: namespace.into(),
            allow,
            deny: Vec::new(),
        }
    }

    /// Whether a datapoint carrying `restricts` passes this filter.
    ///
    /// With allow tokens, the datapoint must carry at least one of them in the
    /// same namespace. A datapoint carrying any deny token is excluded, and so
    /// is one whose own deny list names a queried allow token.
    pub fn matches(&self, restricts: &[Restrict]) -> bool {
        let restrict = restricts.iter().find(|r| r.namespace == self.namespace);
        let tokens: &[String] = restrict.map(|r| r.allow.as_slice()).unwrap_or(&[]);
        let denied: &[String] = restrict.map(|r| r.deny.as_slice()).unwrap_or(&[]);

        if !self.allow.is_empty() && !tokens.iter().any(|t| self.allow.contains(t)) {
            return false;
        }
        if tokens.iter().any(|t| self.deny.contains(t)) {
            return false;
        }
        !denied.iter().any(|t| self.allow.contains(t))
    }
}

/// Neighbor search request.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborQuery {
    /// Dense query vector.
    pub vector: Vec<f32>,
    /// Sparse query vector for hybrid search.
    pub sparse: Option<SparseVector>,
    /// Number of neighbors to return.
    pub top_k: usize,
    /// Namespace filters; all must match.
    pub filters: Vec<NamespaceFilter>,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Datapoint identifier.
    pub id: String,
    /// Similarity score; higher is closer.
    pub score: f32,
    /// Metadata stored with the datapoint, if returned.
    pub metadata: Option<Map<String, Value>>,
}
