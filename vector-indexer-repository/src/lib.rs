//! # Vector Indexer Repository
//!
//! This crate provides traits and implementations for the external systems
//! the indexing pipeline talks to: tabular sources, the embedding model, the
//! object store, the vector index and the audit store. It includes in-memory
//! and local filesystem backends, an HTTP embedding client and an OpenSearch
//! vector index.

pub mod embedding;
pub mod errors;
pub mod filesystem;
pub mod interfaces;
pub mod memory;
pub mod opensearch;
pub mod predicate;
pub mod shards;
pub mod types;

pub use errors::ServiceError;
pub use interfaces::{
    AuditStore, EmbeddingModel, EmbeddingTask, ObjectStore, RowStream, TabularSource, VectorIndex,
};
pub use opensearch::OpenSearchVectorIndex;
pub use types::{
    BatchOperationResult, BatchOperationSummary, BatchUpdateOperation, NamespaceFilter, Neighbor,
    NeighborQuery, ObjectUri,
};
