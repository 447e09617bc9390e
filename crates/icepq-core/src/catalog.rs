//! Version-hint catalog: the single mutable pointer of a table.
//!
//! A table's state is the metadata document named by
//! `metadata/version-hint.text`. This module owns every read and write of that
//! pointer:
//!
//! - [`VersionHintCatalog::create_table`] writes the first metadata document
//!   and the hint, both create-only.
//! - [`VersionHintCatalog::load_table`] follows the hint.
//! - [`VersionHintCatalog::commit_table`] validates [`TableRequirement`]s,
//!   applies [`TableUpdate`]s, writes a new metadata document and swaps the
//!   hint.
//! - [`do_commit`] re-runs a whole load/mutate/commit closure while it fails
//!   with a retryable conflict.
//!
//! Errors are reported as [`CatalogError`]; conflicts that a retry can resolve
//! answer `true` to [`CatalogError::is_retryable`].

pub mod commit;
pub mod version_hint;

use snafu::{Backtrace, prelude::*};

use crate::storage::StorageError;

pub use commit::{CommitRetryConfig, RetryableError, TableRequirement, TableUpdate, do_commit};
pub use version_hint::VersionHintCatalog;

/// Errors raised by catalog operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CatalogError {
    /// No version hint exists at the location.
    #[snafu(display("Table not found at {location}"))]
    TableNotFound {
        /// Table root URI.
        location: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// A version hint already exists at the location.
    #[snafu(display("Table already exists at {location}"))]
    TableAlreadyExists {
        /// Table root URI.
        location: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// The version hint moved since the committing caller loaded the table.
    #[snafu(display(
        "Concurrent commit: expected version hint {expected:?}, found {found:?}"
    ))]
    ConcurrentCommit {
        /// Metadata file name the caller started from.
        expected: String,
        /// Metadata file name currently in the hint.
        found: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// The new metadata file name was already taken.
    #[snafu(display("Metadata file {path} already exists"))]
    MetadataCollision {
        /// Root-relative path of the metadata file.
        path: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// A commit requirement does not hold for the loaded metadata.
    #[snafu(display("Commit requirement failed: {msg}"))]
    RequirementFailed {
        /// Which requirement failed and why.
        msg: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// An update would break a metadata invariant.
    #[snafu(display("Invalid metadata update: {msg}"))]
    InvalidUpdate {
        /// What was wrong with the update.
        msg: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// The hint or the metadata it names is unreadable.
    #[snafu(display("Corrupt catalog state: {msg}"))]
    CorruptState {
        /// A description of the corrupt state.
        msg: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// Metadata could not be serialized.
    #[snafu(display("Failed to serialize table metadata: {source}"))]
    SerializeMetadata {
        /// Underlying JSON error.
        source: serde_json::Error,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// Underlying storage error.
    ///
    /// Backtraces are delegated to the inner StorageError.
    #[snafu(display("Storage error while accessing the catalog: {source}"))]
    Storage {
        /// Underlying storage error returned by the storage backend.
        #[snafu(backtrace)]
        source: StorageError,
    },
}

impl CatalogError {
    /// True when the table does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::TableNotFound { .. })
    }

    /// True for conflicts that re-running the whole operation can resolve.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CatalogError::ConcurrentCommit { .. } | CatalogError::MetadataCollision { .. }
        )
    }
}

impl RetryableError for CatalogError {
    fn is_retryable(&self) -> bool {
        CatalogError::is_retryable(self)
    }
}
