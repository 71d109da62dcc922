//! Embedding model clients.

mod http;

pub use http::{HttpEmbeddingConfig, HttpEmbeddingModel};
