//! Embedding model trait definition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// What the produced vectors are used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmbeddingTask {
    /// Vectors stored in the index.
    RetrievalDocument,
    /// Vectors used to query the index.
    RetrievalQuery,
}

impl EmbeddingTask {
    /// Wire name of the task.
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingTask::RetrievalDocument => "RETRIEVAL_DOCUMENT",
            EmbeddingTask::RetrievalQuery => "RETRIEVAL_QUERY",
        }
    }
}

/// Abstract interface for a text embedding model.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embed a batch of texts.
    ///
    /// Returns one vector per input, in input order. A response with a
    /// different number of vectors is treated by callers as a failed call.
    async fn embed(
        &self,
        texts: &[String],
        task: EmbeddingTask,
        dimension: usize,
    ) -> Result<Vec<Vec<f32>>, ServiceError>;

    /// Model identifier, for logging.
    fn model_name(&self) -> &str;
}
