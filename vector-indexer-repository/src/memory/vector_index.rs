use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::interfaces::{ObjectStore, VectorIndex};
use crate::shards::load_prefix;
use crate::types::{
    BatchOperationResult, BatchOperationSummary, BatchUpdateOperation, Neighbor, NeighborQuery,
    ObjectUri,
};
use vector_indexer_shared::{Datapoint, DistanceMeasure};

/// Brute-force vector index held in memory.
///
/// Batch updates read shards from the object store the index was built with.
pub struct InMemoryVectorIndex {
    dimension: usize,
    distance: DistanceMeasure,
    store: Arc<dyn ObjectStore>,
    datapoints: RwLock<BTreeMap<String, Datapoint>>,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: usize, distance: DistanceMeasure, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            dimension,
            distance,
            store,
            datapoints: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of datapoints in the index.
    pub async fn len(&self) -> usize {
        self.datapoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.datapoints.read().await.is_empty()
    }

    /// Look up a datapoint by id.
    pub async fn get(&self, id: &str) -> Option<Datapoint> {
        self.datapoints.read().await.get(id).cloned()
    }

    fn check(&self, datapoint: &Datapoint) -> Result<(), ServiceError> {
        if datapoint.embedding.len() != self.dimension {
            return Err(ServiceError::invalid_request(format!(
                "datapoint {} has {} dimensions, index expects {}",
                datapoint.id,
                datapoint.embedding.len(),
                self.dimension
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, datapoints: &[Datapoint]) -> Result<BatchOperationSummary, ServiceError> {
        let mut index = self.datapoints.write().await;
        let results = datapoints
            .iter()
            .map(|datapoint| match self.check(datapoint) {
                Ok(()) => {
                    index.insert(datapoint.id.clone(), datapoint.clone());
                    BatchOperationResult::ok(&datapoint.id)
                }
                Err(e) => BatchOperationResult::failed(&datapoint.id, e),
            })
            .collect();
        Ok(BatchOperationSummary::from_results(results))
    }

    async fn remove(&self, ids: &[String]) -> Result<BatchOperationSummary, ServiceError> {
        let mut index = self.datapoints.write().await;
        let results = ids
            .iter()
            .map(|id| {
                index.remove(id);
                BatchOperationResult::ok(id)
            })
            .collect();
        Ok(BatchOperationSummary::from_results(results))
    }

    async fn batch_update(
        &self,
        contents_uri: &str,
        complete_overwrite: bool,
    ) -> Result<BatchUpdateOperation, ServiceError> {
        let prefix: ObjectUri = contents_uri.parse()?;
        let (files, datapoints) = load_prefix(self.store.as_ref(), &prefix).await?;
        for datapoint in &datapoints {
            self.check(datapoint)?;
        }

        let mut index = self.datapoints.write().await;
        if complete_overwrite {
            index.clear();
        }
        let count = datapoints.len();
        for datapoint in datapoints {
            index.insert(datapoint.id.clone(), datapoint);
        }

        info!(
            contents_uri = %contents_uri,
            files = files.len(),
            datapoints = count,
            complete_overwrite,
            "Applied batch update"
        );

        Ok(BatchUpdateOperation {
            operation_id: Uuid::new_v4().to_string(),
            contents_uri: contents_uri.to_string(),
            files: files.iter().map(ToString::to_string).collect(),
            complete_overwrite,
            started_at: Utc::now(),
        })
    }

    async fn find_neighbors(&self, query: &NeighborQuery) -> Result<Vec<Neighbor>, ServiceError> {
        if query.vector.len() != self.dimension {
            return Err(ServiceError::invalid_request(format!(
                "query has {} dimensions, index expects {}",
                query.vector.len(),
                self.dimension
            )));
        }

        let index = self.datapoints.read().await;
        let mut scored: Vec<(f32, &Datapoint)> = index
            .values()
            .filter(|dp| query.filters.iter().all(|f| f.matches(&dp.restricts)))
            .map(|dp| {
                let mut score = self.distance.score(&query.vector, &dp.embedding);
                if let (Some(q), Some(s)) = (&query.sparse, &dp.sparse_embedding) {
                    score += q.dot(s);
                }
                (score, dp)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        scored.truncate(query.top_k);
        debug!(hits = scored.len(), "Neighbor search complete");

        Ok(scored
            .into_iter()
            .map(|(score, dp)| Neighbor {
                id: dp.id.clone(),
                score,
                metadata: dp.embedding_metadata.clone(),
            })
            .collect())
    }
}
