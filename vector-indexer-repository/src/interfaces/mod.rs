//! Interface definitions for the collaborators the pipeline talks to.
//!
//! Every external dependency sits behind one of these traits so that the
//! pipeline can be wired against cloud backends, local backends or test
//! doubles without change.

mod audit_store;
mod embedding_model;
mod object_store;
mod tabular_source;
mod vector_index;

pub use audit_store::AuditStore;
pub use embedding_model::{EmbeddingModel, EmbeddingTask};
pub use object_store::ObjectStore;
pub use tabular_source::{RowStream, TabularSource};
pub use vector_index::VectorIndex;
