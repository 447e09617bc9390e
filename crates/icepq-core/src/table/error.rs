//! Error types and SNAFU context selectors for table operations.
//!
//! Catalog, footer, schema and manifest failures are wrapped as-is so callers
//! can still reach the layer that failed; the remaining variants are
//! operation-level validation errors, all raised before anything is written.

use snafu::prelude::*;

use crate::{
    catalog::{CatalogError, RetryableError},
    formats::{
        avro::ManifestError,
        parquet::{ParquetFooterError, SchemaInferenceError},
    },
    storage::StorageError,
};

/// Errors from table operations (append, merge, replace, reads).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TableError {
    /// Catalog failure: missing or existing table, commit conflict, corrupt
    /// pointer.
    #[snafu(display("Catalog error: {source}"))]
    Catalog {
        /// Underlying catalog error.
        #[snafu(source, backtrace)]
        source: CatalogError,
    },

    /// A data file footer could not be read.
    #[snafu(display("Parquet footer error: {source}"))]
    ParquetFooter {
        /// Underlying footer error.
        source: ParquetFooterError,
    },

    /// A data file schema has no table equivalent.
    #[snafu(display("Schema inference failed for {path}: {source}"))]
    SchemaInference {
        /// Root-relative path of the file.
        path: String,
        /// Underlying inference error.
        source: SchemaInferenceError,
    },

    /// A manifest or manifest list could not be encoded or decoded.
    #[snafu(display("Manifest error for {path}: {source}"))]
    Manifest {
        /// URI of the manifest or manifest list.
        path: String,
        /// Underlying codec error.
        #[snafu(source, backtrace)]
        source: ManifestError,
    },

    /// Storage error while reading or writing manifests or listing metadata.
    #[snafu(display("Storage error while accessing table files: {source}"))]
    Storage {
        /// Underlying storage error.
        #[snafu(backtrace)]
        source: StorageError,
    },

    /// A file schema differs from the table schema (or from the first file
    /// when bootstrapping a table).
    #[snafu(display("Schema of {path} does not match {reference}"))]
    SchemaMismatch {
        /// Root-relative path of the offending file.
        path: String,
        /// What it was compared against.
        reference: String,
    },

    /// A file path is not under the table's `data/` prefix.
    #[snafu(display("File {path} is outside the table data prefix {prefix}"))]
    FileOutsideTablePrefix {
        /// The offending path or URI.
        path: String,
        /// The required prefix.
        prefix: String,
    },

    /// A merge or replace input is not live in the current snapshot.
    #[snafu(display("Input file {path} is not part of the current snapshot"))]
    InputFileNotFound {
        /// URI of the missing file.
        path: String,
    },

    /// A file is declared twice or already tracked by the table.
    #[snafu(display("Duplicate data file {path}"))]
    DuplicateFile {
        /// URI of the duplicated file.
        path: String,
    },

    /// The requested field does not exist in the current schema.
    #[snafu(display("Field {name} not found in the table schema"))]
    FieldNotFound {
        /// Requested (dotted) field name.
        name: String,
    },

    /// Bound values of the field's type cannot be decoded.
    #[snafu(display("Cannot decode bounds of field {field} with type {field_type}"))]
    UnsupportedType {
        /// Field name.
        field: String,
        /// Declared type.
        field_type: String,
    },

    /// A stored bound has the wrong length for the field type.
    #[snafu(display("Malformed bound for field {field} in {path}: {len} bytes"))]
    MalformedBound {
        /// Field name.
        field: String,
        /// Data file URI.
        path: String,
        /// Observed length.
        len: usize,
    },

    /// A delete file was encountered while delete files were disallowed.
    #[snafu(display("Delete file {path} found in the current snapshot"))]
    DeleteFilesPresent {
        /// Delete file URI.
        path: String,
    },

    /// A data file has no bound for the field while bounds were required.
    #[snafu(display("Missing bound value for field {field} in {path}"))]
    MissingBoundValue {
        /// Field name.
        field: String,
        /// Data file URI.
        path: String,
    },

    /// The operation has nothing to do.
    #[snafu(display("Empty operation: {msg}"))]
    EmptyOperation {
        /// What was empty.
        msg: String,
    },

    /// Metadata is internally inconsistent (for example the current schema
    /// id names no schema).
    #[snafu(display("Corrupt table metadata: {msg}"))]
    CorruptMetadata {
        /// What is inconsistent.
        msg: String,
    },
}

impl TableError {
    /// True for commit conflicts that re-running the operation can resolve.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TableError::Catalog { source, .. } if source.is_retryable())
    }

    /// True when the table does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TableError::Catalog { source, .. } if source.is_not_found())
    }
}

impl RetryableError for TableError {
    fn is_retryable(&self) -> bool {
        TableError::is_retryable(self)
    }
}

impl From<CatalogError> for TableError {
    fn from(source: CatalogError) -> Self {
        TableError::Catalog { source }
    }
}
