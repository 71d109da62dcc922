//! # Vector Indexer
//!
//! Main library for the vector indexer.
//!
//! This crate provides the configuration and dependency wiring behind the
//! `vector-indexer` command line.

pub mod config;

pub use config::{AppConfig, Dependencies};

use thiserror::Error;

/// Errors that can occur during indexer initialization or execution.
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Pipeline error.
    #[error("Pipeline error: {0}")]
    PipelineError(#[from] vector_indexer_pipeline::PipelineError),

    /// Collaborator error.
    #[error("Service error: {0}")]
    ServiceError(#[from] vector_indexer_repository::ServiceError),

    /// Malformed request or datapoint file.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl IndexingError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
