//! OpenSearch implementation of the vector index.
//!
//! This module provides a concrete implementation of `VectorIndex`
//! using OpenSearch k-NN as the backend.

mod client;
mod index_config;
mod queries;

pub use client::OpenSearchVectorIndex;
pub use index_config::{get_index_settings, VectorIndexConfig};
