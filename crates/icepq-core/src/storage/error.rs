//! Storage error types.
//!
//! Backend failures are normalized here so callers can branch on "not found"
//! and "already exists" without knowing which backend produced them.

use std::{error::Error, fmt, io};

use snafu::{Backtrace, prelude::*};

/// Errors produced by a storage backend implementation.
///
/// Backend-specific failures are wrapped in this enum so higher layers can map
/// them into [`StorageError`] variants with additional path context.
#[derive(Debug)]
pub enum BackendError {
    /// A local filesystem I/O error.
    Local(io::Error),
    /// An error returned by an `object_store` backend (S3, GCS, Azure, memory).
    ObjectStore(object_store::Error),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Local(e) => write!(f, "local I/O error: {e}"),
            BackendError::ObjectStore(e) => write!(f, "object store error: {e}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BackendError::Local(e) => Some(e),
            BackendError::ObjectStore(e) => Some(e),
        }
    }
}

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The specified path was not found.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// The path that was not found.
        path: String,
        /// Underlying backend error that caused the failure.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The specified path already exists when creation was requested with
    /// create-new semantics.
    #[snafu(display("Path already exists: {path}"))]
    AlreadyExists {
        /// The path that was found to already exist.
        path: String,
        /// Underlying backend error that indicates the existing resource.
        source: BackendError,
        /// The backtrace captured when the error occurred.
        backtrace: Backtrace,
    },

    /// The specified path already exists; detected by an explicit existence
    /// probe rather than by the backend rejecting the write.
    #[snafu(display("Path already exists: {path}"))]
    AlreadyExistsNoSource {
        /// The path that was found to already exist.
        path: String,
        /// The backtrace captured when the error occurred.
        backtrace: Backtrace,
    },

    /// Any other backend failure.
    #[snafu(display("I/O error at {path}: {source}"))]
    OtherIo {
        /// The path where the I/O error occurred.
        path: String,
        /// Underlying backend error with platform-specific details.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// A user-facing location string could not be turned into a backend.
    #[snafu(display("Invalid table location {location:?}: {msg}"))]
    InvalidLocation {
        /// The location string as supplied by the caller.
        location: String,
        /// Why the location was rejected.
        msg: String,
        /// The backtrace captured when the error occurred.
        backtrace: Backtrace,
    },
}

impl StorageError {
    /// True when the error means "the object does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// True when the error means "the object already exists".
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            StorageError::AlreadyExists { .. } | StorageError::AlreadyExistsNoSource { .. }
        )
    }
}

/// Classify an `object_store` failure into the matching [`StorageError`].
pub(crate) fn from_object_store(path: String, err: object_store::Error) -> StorageError {
    let backtrace = Backtrace::capture();
    match err {
        err @ object_store::Error::NotFound { .. } => StorageError::NotFound {
            path,
            source: BackendError::ObjectStore(err),
            backtrace,
        },
        err @ object_store::Error::AlreadyExists { .. } => StorageError::AlreadyExists {
            path,
            source: BackendError::ObjectStore(err),
            backtrace,
        },
        err => StorageError::OtherIo {
            path,
            source: BackendError::ObjectStore(err),
            backtrace,
        },
    }
}

/// Classify a local I/O failure into the matching [`StorageError`].
pub(crate) fn from_local_io(path: String, err: io::Error) -> StorageError {
    let backtrace = Backtrace::capture();
    match err.kind() {
        io::ErrorKind::NotFound => StorageError::NotFound {
            path,
            source: BackendError::Local(err),
            backtrace,
        },
        io::ErrorKind::AlreadyExists => StorageError::AlreadyExists {
            path,
            source: BackendError::Local(err),
            backtrace,
        },
        _ => StorageError::OtherIo {
            path,
            source: BackendError::Local(err),
            backtrace,
        },
    }
}
