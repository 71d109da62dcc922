//! Local filesystem implementations of the collaborator interfaces.
//!
//! These back local runs: tables are newline-delimited JSON files, buckets are
//! directories and the audit log is an append-only JSON lines file.

mod audit_store;
mod object_store;
mod source;

pub use audit_store::JsonLinesAuditStore;
pub use object_store::FileSystemObjectStore;
pub use source::JsonLinesSource;
