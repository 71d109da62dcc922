//! OpenSearch client implementation.
//!
//! This module provides the concrete implementation of `VectorIndex`
//! using the OpenSearch Rust client and its k-NN plugin.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use opensearch::{
    cluster::ClusterHealthParts,
    http::request::JsonBody,
    http::response::Response,
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    indices::{IndicesCreateParts, IndicesExistsParts, IndicesRefreshParts},
    BulkParts, DeleteByQueryParts, OpenSearch, SearchParts,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::interfaces::{ObjectStore, VectorIndex};
use crate::opensearch::index_config::{get_index_settings, VectorIndexConfig};
use crate::opensearch::queries::{build_document, build_knn_query};
use crate::shards::load_prefix;
use crate::types::{
    BatchOperationResult, BatchOperationSummary, BatchUpdateOperation, Neighbor, NeighborQuery,
    ObjectUri,
};
use vector_indexer_shared::Datapoint;

/// OpenSearch client implementation.
///
/// Batch updates read shards through the configured object store and load
/// them with bulk requests.
///
/// # Example
///
/// ```ignore
/// let config = VectorIndexConfig::new("courses", 768, DistanceMeasure::DotProduct);
/// let index = OpenSearchVectorIndex::new("http://localhost:9200", config, store).await?;
/// index.ensure_index_exists().await?;
/// index.upsert(&datapoints).await?;
/// ```
pub struct OpenSearchVectorIndex {
    client: OpenSearch,
    config: VectorIndexConfig,
    store: Arc<dyn ObjectStore>,
}

impl OpenSearchVectorIndex {
    /// Create a new OpenSearch client connected to the specified URL.
    ///
    /// # Arguments
    ///
    /// * `url` - The OpenSearch server URL (e.g., "http://localhost:9200")
    /// * `config` - The index name, dimension and distance measure
    /// * `store` - Object store batch updates read shards from
    pub async fn new(
        url: &str,
        config: VectorIndexConfig,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self, ServiceError> {
        let parsed_url = Url::parse(url).map_err(|e| ServiceError::invalid_request(e.to_string()))?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);
        let transport = TransportBuilder::new(conn_pool)
            .disable_proxy()
            .build()
            .map_err(|e| ServiceError::unavailable(e.to_string()))?;

        let client = OpenSearch::new(transport);

        info!(
            url = %url,
            index = %config.index_name,
            dimension = config.dimension,
            "Created OpenSearch client"
        );

        Ok(Self {
            client,
            config,
            store,
        })
    }

    /// Create the index with its knn mapping if it does not exist yet.
    pub async fn ensure_index_exists(&self) -> Result<(), ServiceError> {
        let response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[&self.config.index_name]))
            .send()
            .await
            .map_err(transport_error)?;
        if response.status_code().is_success() {
            return Ok(());
        }

        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(&self.config.index_name))
            .body(get_index_settings(&self.config))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;

        info!(index = %self.config.index_name, "Created vector index");
        Ok(())
    }

    async fn send_bulk(
        &self,
        body: Vec<JsonBody<Value>>,
        ids: &[String],
        action: &str,
    ) -> Result<BatchOperationSummary, ServiceError> {
        let response = self
            .client
            .bulk(BulkParts::Index(&self.config.index_name))
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        let response_body: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::serialization(e.to_string()))?;

        let summary = parse_bulk_response(&response_body, ids, action);
        if summary.failed > 0 {
            warn!(
                action,
                failed = summary.failed,
                total = summary.total,
                "Bulk request had item failures"
            );
        }
        Ok(summary)
    }

    async fn refresh(&self) -> Result<(), ServiceError> {
        let response = self
            .client
            .indices()
            .refresh(IndicesRefreshParts::Index(&[&self.config.index_name]))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await.map(|_| ())
    }

    async fn clear(&self) -> Result<(), ServiceError> {
        let response = self
            .client
            .delete_by_query(DeleteByQueryParts::Index(&[&self.config.index_name]))
            .body(json!({ "query": { "match_all": {} } }))
            .refresh(true)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await.map(|_| ())
    }
}

fn transport_error(err: opensearch::Error) -> ServiceError {
    match err.status_code() {
        Some(status) => ServiceError::from_status(status.as_u16(), err.to_string()),
        None => ServiceError::unavailable(err.to_string()),
    }
}

async fn check_status(response: Response) -> Result<Response, ServiceError> {
    let status = response.status_code();
    if status.is_success() {
        return Ok(response);
    }
    let error_body = response.text().await.unwrap_or_default();
    error!(status = %status, body = %error_body, "OpenSearch request failed");
    Err(ServiceError::from_status(status.as_u16(), error_body))
}

/// Map bulk response items back to datapoint ids.
///
/// For deletes, a 404 item counts as success since the document is absent
/// either way.
fn parse_bulk_response(body: &Value, ids: &[String], action: &str) -> BatchOperationSummary {
    let empty_vec = Vec::<Value>::new();
    let items = body
        .get("items")
        .and_then(|i| i.as_array())
        .unwrap_or(&empty_vec);

    let results = ids
        .iter()
        .enumerate()
        .map(|(idx, id)| {
            let item = items.get(idx).and_then(|item| item.get(action));
            let status = item
                .and_then(|i| i.get("status"))
                .and_then(|s| s.as_u64())
                .unwrap_or(500) as u16;
            let error = item.and_then(|i| i.get("error"));

            if (200..300).contains(&status) || (action == "delete" && status == 404) {
                BatchOperationResult::ok(id)
            } else {
                let message = error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "missing bulk item".to_string());
                BatchOperationResult::failed(id, ServiceError::from_status(status, message))
            }
        })
        .collect();

    BatchOperationSummary::from_results(results)
}

fn parse_hit(hit: &Value) -> Option<Neighbor> {
    let id = hit.get("_id")?.as_str()?.to_string();
    let score = hit.get("_score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32;
    let metadata = hit
        .get("_source")
        .and_then(|s| s.get("metadata"))
        .and_then(|m| m.as_object())
        .cloned();
    Some(Neighbor {
        id,
        score,
        metadata,
    })
}

#[async_trait]
impl VectorIndex for OpenSearchVectorIndex {
    #[instrument(skip(self, datapoints), fields(count = datapoints.len()))]
    async fn upsert(&self, datapoints: &[Datapoint]) -> Result<BatchOperationSummary, ServiceError> {
        if datapoints.is_empty() {
            return Ok(BatchOperationSummary::default());
        }

        let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(datapoints.len() * 2);
        for datapoint in datapoints {
            body.push(json!({"index": {"_index": self.config.index_name, "_id": datapoint.id}}).into());
            body.push(build_document(datapoint).into());
        }
        let ids: Vec<String> = datapoints.iter().map(|d| d.id.clone()).collect();

        let summary = self.send_bulk(body, &ids, "index").await?;
        debug!(succeeded = summary.succeeded, "Datapoints upserted");
        Ok(summary)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn remove(&self, ids: &[String]) -> Result<BatchOperationSummary, ServiceError> {
        if ids.is_empty() {
            return Ok(BatchOperationSummary::default());
        }

        let body: Vec<JsonBody<Value>> = ids
            .iter()
            .map(|id| json!({"delete": {"_index": self.config.index_name, "_id": id}}).into())
            .collect();

        let summary = self.send_bulk(body, ids, "delete").await?;
        debug!(succeeded = summary.succeeded, "Datapoints removed");
        Ok(summary)
    }

    #[instrument(skip(self))]
    async fn batch_update(
        &self,
        contents_uri: &str,
        complete_overwrite: bool,
    ) -> Result<BatchUpdateOperation, ServiceError> {
        let prefix: ObjectUri = contents_uri.parse()?;
        let (files, datapoints) = load_prefix(self.store.as_ref(), &prefix).await?;

        if complete_overwrite {
            self.clear().await?;
        }

        let mut failed = 0;
        for chunk in datapoints.chunks(self.config.bulk_batch_size.max(1)) {
            failed += self.upsert(chunk).await?.failed;
        }
        self.refresh().await?;

        if failed > 0 {
            return Err(ServiceError::invalid_request(format!(
                "{} of {} datapoints under {} were refused",
                failed,
                datapoints.len(),
                contents_uri
            )));
        }

        info!(
            contents_uri = %contents_uri,
            files = files.len(),
            datapoints = datapoints.len(),
            complete_overwrite,
            "Batch update applied"
        );

        Ok(BatchUpdateOperation {
            operation_id: Uuid::new_v4().to_string(),
            contents_uri: contents_uri.to_string(),
            files: files.iter().map(ToString::to_string).collect(),
            complete_overwrite,
            started_at: Utc::now(),
        })
    }

    #[instrument(skip(self, query), fields(top_k = query.top_k))]
    async fn find_neighbors(&self, query: &NeighborQuery) -> Result<Vec<Neighbor>, ServiceError> {
        let response = self
            .client
            .search(SearchParts::Index(&[&self.config.index_name]))
            .body(build_knn_query(query))
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        let response_body: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::serialization(e.to_string()))?;

        let neighbors = response_body
            .get("hits")
            .and_then(|h| h.get("hits"))
            .and_then(|h| h.as_array())
            .map(|hits| hits.iter().filter_map(parse_hit).collect())
            .unwrap_or_default();
        Ok(neighbors)
    }

    async fn health_check(&self) -> Result<bool, ServiceError> {
        let response = self
            .client
            .cluster()
            .health(ClusterHealthParts::None)
            .send()
            .await
            .map_err(transport_error)?;
        let health: Value = response.json().await.unwrap_or(json!({}));
        let status = health.get("status").and_then(|s| s.as_str()).unwrap_or("unknown");

        debug!(status = %status, "OpenSearch cluster status");
        Ok(status == "green" || status == "yellow")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bulk_response_maps_items() {
        let body = json!({
            "errors": true,
            "items": [
                {"index": {"_id": "1", "status": 201}},
                {"index": {"_id": "2", "status": 400, "error": {"type": "mapper_parsing_exception"}}}
            ]
        });
        let ids = vec!["1".to_string(), "2".to_string()];

        let summary = parse_bulk_response(&body, &ids, "index");
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert!(matches!(
            summary.results[1].error,
            Some(ServiceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_parse_bulk_response_delete_missing_is_success() {
        let body = json!({"items": [{"delete": {"_id": "1", "status": 404}}]});
        let summary = parse_bulk_response(&body, &["1".to_string()], "delete");
        assert_eq!(summary.succeeded, 1);
    }

    #[test]
    fn test_parse_bulk_response_missing_items_fail() {
        let summary = parse_bulk_response(&json!({}), &["1".to_string()], "index");
        assert_eq!(summary.failed, 1);
        assert!(summary.results[0].error.as_ref().unwrap().is_transient());
    }

    #[test]
    fn test_parse_hit() {
        let hit = json!({
            "_id": "42",
            "_score": 0.87,
            "_source": {"metadata": {"title": "Rust"}}
        });
        let neighbor = parse_hit(&hit).unwrap();
        assert_eq!(neighbor.id, "42");
        assert!((neighbor.score - 0.87).abs() < 1e-6);
        assert_eq!(neighbor.metadata.unwrap()["title"], "Rust");

        assert!(parse_hit(&json!({"_score": 1.0})).is_none());
    }
}
