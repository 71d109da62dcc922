//! Embedding module for the vector indexer pipeline.
//!
//! Produces dense (and optionally sparse) vectors for validated items.

mod generator;
mod normalize;
mod sparse;

pub use generator::{EmbedOutcome, EmbeddingConfig, EmbeddingGenerator};
pub use normalize::{l2_normalize, NormalizationPolicy};
pub use sparse::{SparseConfig, SparseEncoder};
