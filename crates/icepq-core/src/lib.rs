//! Core engine for Iceberg-compatible tables kept on object storage.
//!
//! This crate provides the pieces needed to mutate a table without an
//! external catalog service:
//!
//! - A version-hint catalog: `metadata/version-hint.text` names the current
//!   metadata document, and commits swap it optimistically (`catalog`
//!   module).
//! - Strongly typed Iceberg v2 metadata, snapshots and manifests
//!   (`metadata` module), with Avro manifest codecs and a Parquet footer
//!   reader that infers schemas and column bounds (`formats` module).
//! - Table operations: append (creating the table on first use), merge
//!   (compaction), replace, field bound values and file listings (`table`
//!   module).
//! - Storage helpers over the local filesystem and `object_store` backends
//!   (`storage` module).
//!
//! Every operation starts from a fresh read of the version hint; nothing is
//! cached between calls. Front-ends (a CLI, a query-engine UDF) are expected
//! to depend on this crate for argument marshalling only.
#![deny(missing_docs)]
pub mod catalog;
pub mod formats;
pub mod metadata;
pub mod storage;
pub mod table;

#[cfg(test)]
mod test_util;

pub use catalog::{CatalogError, CommitRetryConfig, VersionHintCatalog};
pub use table::{OperationConfig, Table, TableError};
