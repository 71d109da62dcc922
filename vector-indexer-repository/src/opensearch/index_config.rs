//! OpenSearch index configuration and mappings.
//!
//! This module defines the index settings and mappings for the vector index.

use serde_json::{json, Value};

use vector_indexer_shared::DistanceMeasure;

/// Field holding the dense embedding.
pub const EMBEDDING_FIELD: &str = "embedding";
/// Keyword field holding `namespace=token` allow entries.
pub const RESTRICT_ALLOW_FIELD: &str = "restrict_allow";
/// Keyword field holding `namespace=token` deny entries.
pub const RESTRICT_DENY_FIELD: &str = "restrict_deny";

/// Configuration of the vector index.
#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    /// Index name.
    pub index_name: String,
    /// Embedding dimension.
    pub dimension: usize,
    /// Distance measure the index is built with.
    pub distance: DistanceMeasure,
    /// Maximum datapoints per bulk request.
    pub bulk_batch_size: usize,
}

impl VectorIndexConfig {
    pub fn new(index_name: impl Into<String>, dimension: usize, distance: DistanceMeasure) -> Self {
        Self {
            index_name: index_name.into(),
            dimension,
            distance,
            bulk_batch_size: 500,
        }
    }
}

/// Space type for the knn method.
pub fn space_type(distance: DistanceMeasure) -> &'static str {
    match distance {
        DistanceMeasure::DotProduct => "innerproduct",
        DistanceMeasure::Cosine => "cosinesimil",
        DistanceMeasure::SquaredL2 => "l2",
    }
}

/// Get the index settings and mappings for the vector index.
///
/// The embedding is an HNSW `knn_vector`. Restricts are flattened into
/// keyword fields so they can be used as knn pre-filters. Metadata is kept in
/// the source only.
pub fn get_index_settings(config: &VectorIndexConfig) -> Value {
    json!({
        "settings": {
            "index": {
                "knn": true
            },
            "number_of_shards": 1,
            "number_of_replicas": 1
        },
        "mappings": {
            "properties": {
                "datapoint_id": {
                    "type": "keyword"
                },
                "namespace": {
                    "type": "keyword"
                },
                EMBEDDING_FIELD: {
                    "type": "knn_vector",
                    "dimension": config.dimension,
                    "method": {
                        "name": "hnsw",
                        "engine": "lucene",
                        "space_type": space_type(config.distance)
                    }
                },
                RESTRICT_ALLOW_FIELD: {
                    "type": "keyword"
                },
                RESTRICT_DENY_FIELD: {
                    "type": "keyword"
                },
                "crowding_tag": {
                    "type": "keyword"
                },
                "numeric_restricts": {
                    "type": "object",
                    "enabled": false
                },
                "sparse_embedding": {
                    "type": "object",
                    "enabled": false
                },
                "metadata": {
                    "type": "object",
                    "enabled": false
                }
            }
        }
    })
}
