//! In-process implementations of the collaborator interfaces.
//!
//! Used by tests and local runs. State lives in memory and is lost when the
//! process exits.

mod audit_store;
mod object_store;
mod source;
mod vector_index;

pub use audit_store::InMemoryAuditStore;
pub use object_store::InMemoryObjectStore;
pub use source::InMemorySource;
pub use vector_index::InMemoryVectorIndex;
