//! HTTP client for OpenAI-compatible `/embeddings` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::errors::ServiceError;
use crate::interfaces::{EmbeddingModel, EmbeddingTask};

/// Configuration for [`HttpEmbeddingModel`].
#[derive(Debug, Clone)]
pub struct HttpEmbeddingConfig {
    /// Base URL; `/embeddings` is appended.
    pub endpoint: String,
    /// Model name sent with each request.
    pub model: String,
    /// Bearer token, if the endpoint requires one.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Prepended to document texts.
    pub document_prefix: String,
    /// Prepended to query texts.
    pub query_prefix: String,
}

impl Default for HttpEmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/v1".to_string(),
            model: "text-embedding-005".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            document_prefix: String::new(),
            query_prefix: String::new(),
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Embedding model reached over HTTP.
pub struct HttpEmbeddingModel {
    client: Client,
    url: String,
    config: HttpEmbeddingConfig,
}

impl HttpEmbeddingModel {
    /// Create a client for the configured endpoint.
    pub fn new(config: HttpEmbeddingConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ServiceError::unavailable(e.to_string()))?;
        let url = format!("{}/embeddings", config.endpoint.trim_end_matches('/'));
        Ok(Self { client, url, config })
    }

    fn prefix(&self, task: EmbeddingTask) -> &str {
        match task {
            EmbeddingTask::RetrievalDocument => &self.config.document_prefix,
            EmbeddingTask::RetrievalQuery => &self.config.query_prefix,
        }
    }
}

fn map_transport_error(err: reqwest::Error, timeout: Duration) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout(timeout)
    } else if let Some(status) = err.status() {
        ServiceError::from_status(status.as_u16(), err.to_string())
    } else {
        ServiceError::unavailable(err.to_string())
    }
}

/// Order vectors by the `index` the server returned, falling back to response order.
fn into_vectors(mut data: Vec<EmbeddingData>) -> Vec<Vec<f32>> {
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }
    data.into_iter().map(|d| d.embedding).collect()
}

#[async_trait]
impl EmbeddingModel for HttpEmbeddingModel {
    #[instrument(skip(self, texts), fields(count = texts.len(), task = task.as_str()))]
    async fn embed(
        &self,
        texts: &[String],
        task: EmbeddingTask,
        dimension: usize,
    ) -> Result<Vec<Vec<f32>>, ServiceError> {
        let prefix = self.prefix(task);
        let body = EmbeddingRequest {
            model: &self.config.model,
            input: texts.iter().map(|t| format!("{}{}", prefix, t)).collect(),
            dimensions: dimension,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| map_transport_error(e, self.config.timeout))?;
        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ServiceError::from_status(status.as_u16(), error_body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::serialization(e.to_string()))?;
        debug!(vectors = parsed.data.len(), "Embedding response received");
        Ok(into_vectors(parsed.data))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_and_prefix() {
        let model = HttpEmbeddingModel::new(HttpEmbeddingConfig {
            endpoint: "http://embed:8080/v1/".to_string(),
            query_prefix: "query: ".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(model.url, "http://embed:8080/v1/embeddings");
        assert_eq!(model.prefix(EmbeddingTask::RetrievalQuery), "query: ");
        assert_eq!(model.prefix(EmbeddingTask::RetrievalDocument), "");
    }

    #[test]
    fn test_response_is_reordered_by_index() {
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"index":1,"embedding":[2.0]},{"index":0,"embedding":[1.0]}]}"#,
        )
        .unwrap();
        assert_eq!(into_vectors(response.data), vec![vec![1.0], vec![2.0]]);
    }
}
