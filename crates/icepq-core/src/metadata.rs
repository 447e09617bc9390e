//! Table metadata model.
//!
//! Strongly typed, serde-backed representations of the documents that make up
//! a table on storage:
//!
//! - [`schema`]: the column tree (`Schema`, `NestedField`, `Type`).
//! - [`table_metadata`]: the `*.metadata.json` document the version hint
//!   points at.
//! - [`snapshot`]: snapshots, their summaries and branch references.
//! - [`manifest`]: manifest-list and manifest entries describing data files.
//!
//! JSON encodings follow the Iceberg v2 table spec so tables stay readable by
//! other Iceberg implementations. Avro encodings of manifests live in
//! [`crate::formats::avro`].

pub mod manifest;
pub mod schema;
pub mod snapshot;
pub mod table_metadata;

pub use manifest::{
    DataContentType, DataFile, DataFileFormat, ManifestContent, ManifestEntry, ManifestFile,
    ManifestStatus,
};
pub use schema::{ListType, NestedField, PrimitiveType, Schema, StructType, Type};
pub use snapshot::{Operation, Snapshot, SnapshotRefType, SnapshotReference, Summary};
pub use table_metadata::{MAIN_BRANCH, MetadataLogEntry, SnapshotLogEntry, TableMetadata};
