//! # Vector Indexer Pipeline
//!
//! This crate provides the pipeline components that turn source records into
//! vector index content, and the orchestrator that drives them as runs.
//!
//! ## Architecture
//!
//! A run flows through the following stages:
//!
//! 1. **Reader**: Pulls rows or pre-embedded datapoints from the source
//! 2. **Transformer**: Validates rows and maps them to items
//! 3. **Embedding**: Generates dense (and optionally sparse) vectors
//! 4. **Writer**: Writes datapoints and rejects as JSONL shards
//! 5. **Loader**: Ingests shards into the vector index
//! 6. **Orchestrator**: Coordinates the pipeline flow and records run state
//!
//! The [`search`] module serves neighbor queries against the same index.

pub mod counters;
pub mod embedding;
pub mod errors;
pub mod loader;
pub mod orchestrator;
pub mod reader;
pub mod retry;
pub mod search;
pub mod transformer;
pub mod writer;

#[cfg(test)]
mod test_support;

pub use embedding::{EmbeddingConfig, EmbeddingGenerator, NormalizationPolicy, SparseConfig};
pub use errors::{ErrorCategory, PipelineError};
pub use loader::{IndexLoader, IngestOutcome, LoaderConfig};
pub use orchestrator::{Components, Orchestrator, OrchestratorConfig, RunIdPolicy};
pub use reader::{ReaderConfig, SourceReader};
pub use retry::RetryPolicy;
pub use search::{QueryInput, SearchConfig, SearchRequest, SearchService};
pub use transformer::{RecordTransformer, TransformerConfig};
pub use writer::{OverwritePolicy, ShardWriter, WriterConfig};
