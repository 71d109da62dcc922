//! Transformer module for the vector indexer pipeline.
//!
//! Validates raw source rows and turns them into canonical items.

mod fields;
mod record_transformer;

pub use record_transformer::{RecordTransformer, TransformerConfig};
