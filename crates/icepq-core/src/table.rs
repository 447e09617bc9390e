//! Table handle and the mutating / read-only table operations.
//!
//! A [`Table`] is an immutable view of one metadata document, obtained from a
//! [`VersionHintCatalog`](crate::catalog::VersionHintCatalog). Operations
//! never mutate a `Table`; a successful commit returns a new one.
//!
//! Operations come in two layers:
//!
//! - single attempts over an already loaded table (`append_to_table`,
//!   `merge_into_table`, `replace_in_table`), which fail with a retryable
//!   [`TableError`] when they lose the commit race;
//! - location-level entry points (`append_files`, `merge_files`,
//!   `replace_files`) that take paths relative to `data/`, and re-run the
//!   whole load / plan / commit cycle under [`do_commit`](crate::catalog::do_commit).
//!
//! All validation (prefixes, schemas, missing or duplicated files) happens
//! before the first write. An abandoned or failed attempt can leave
//! unreferenced manifests behind, never a half-updated table.

pub mod append;
pub mod bounds;
pub mod error;
pub mod files;
pub mod manifests;
pub mod merge;
pub mod replace;
mod snapshot_producer;

use std::collections::HashMap;

use crate::catalog::CommitRetryConfig;
use crate::metadata::{Schema, Snapshot, TableMetadata};
use crate::storage::{TableLocation, layout};

pub use append::{append_files, append_to_table};
pub use bounds::{BoundValue, FieldBoundValues, FieldBoundValuesConfig, field_bound_values};
pub use error::TableError;
pub use files::{
    ManifestDataFiles, ReachableFilesOptions, SnapshotFiles, list_snapshot_files, reachable_files,
};
pub use manifests::ManifestWithEntries;
pub use merge::{MergeOp, MergePlan, merge_files, merge_into_table, plan_merge};
pub use replace::{ReplacePlan, plan_replace, replace_files, replace_in_table};

/// A loaded table: one metadata document and the name it was loaded from.
#[derive(Debug, Clone)]
pub struct Table {
    location: TableLocation,
    metadata: TableMetadata,
    metadata_file_name: String,
}

impl Table {
    pub(crate) fn new(
        location: TableLocation,
        metadata: TableMetadata,
        metadata_file_name: String,
    ) -> Self {
        Table {
            location,
            metadata,
            metadata_file_name,
        }
    }

    /// Table root.
    pub fn location(&self) -> &TableLocation {
        &self.location
    }

    /// The metadata document.
    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    /// File name (under `metadata/`) of the document, as stored in the
    /// version hint.
    pub fn metadata_file_name(&self) -> &str {
        &self.metadata_file_name
    }

    /// Absolute URI of the metadata document.
    pub fn metadata_uri(&self) -> String {
        self.location
            .uri_for(&layout::metadata_rel_path(&self.metadata_file_name))
    }

    /// Current snapshot, if any.
    pub fn current_snapshot(&self) -> Option<&Snapshot> {
        self.metadata.current_snapshot()
    }

    /// Current schema. Fails when the metadata names a schema it does not
    /// contain.
    pub fn current_schema(&self) -> Result<&Schema, TableError> {
        self.metadata.current_schema().ok_or_else(|| {
            error::CorruptMetadataSnafu {
                msg: format!(
                    "current schema id {} not found",
                    self.metadata.current_schema_id
                ),
            }
            .build()
        })
    }
}

/// Settings shared by every table operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationConfig {
    /// Retry policy for commit conflicts.
    pub retry: CommitRetryConfig,
    /// Maximum concurrent footer or manifest reads.
    pub io_concurrency: usize,
}

impl Default for OperationConfig {
    fn default() -> Self {
        OperationConfig {
            retry: CommitRetryConfig::default(),
            io_concurrency: 8,
        }
    }
}

/// Build a property map from `key=value` strings.
///
/// The value is everything after the first `=`; a string without `=` maps to
/// an empty value. Later duplicates win.
pub fn parse_properties<I, S>(pairs: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    pairs
        .into_iter()
        .map(|pair| {
            let pair = pair.as_ref();
            match pair.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (pair.to_string(), String::new()),
            }
        })
        .collect()
}
