//! Error types for the vector indexer repository.

mod service_error;

pub use service_error::ServiceError;
