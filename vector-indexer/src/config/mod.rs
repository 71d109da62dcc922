//! Configuration and dependency wiring for the vector indexer.

mod dependencies;
mod settings;

pub use dependencies::Dependencies;
pub use settings::{AppConfig, Backend, EmbeddingSettings, IndexSettings, MEMORY_BACKEND};
