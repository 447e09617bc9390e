//! On-storage layout helpers for a table root.
//!
//! This module centralizes all *relative* path conventions under a table root:
//!
//! ```text
//! <root>/
//!   data/                                          # data files (Parquet)
//!   metadata/
//!     version-hint.text                            # name of the current metadata file
//!     000000000003-<uuid>.metadata.json            # table metadata, sequence 3
//!     man-<uuid>.avro                              # manifest
//!     snap-<uuid>.avro                             # manifest list
//! ```
//!
//! The functions here return relative [`PathBuf`] values. Callers join them
//! with a [`crate::storage::TableLocation`] before doing I/O.

use std::path::PathBuf;

use uuid::Uuid;

// ====================
// Data layout
// ====================

/// Directory where data files are stored.
pub const DATA_DIR_NAME: &str = "data";

/// Relative path: `data/`
pub fn data_rel_dir() -> PathBuf {
    PathBuf::from(DATA_DIR_NAME)
}

// ====================
// Metadata layout
// ====================

/// Directory holding metadata documents, manifests and the version hint.
pub const METADATA_DIR_NAME: &str = "metadata";

/// Name of the file that stores the current metadata file name.
pub const VERSION_HINT_FILE_NAME: &str = "version-hint.text";

/// Suffix of table metadata documents.
pub const METADATA_FILE_SUFFIX: &str = ".metadata.json";

/// Number of digits used for the zero-padded sequence number prefix.
pub const METADATA_SEQUENCE_DIGITS: usize = 12;

/// Relative path: `metadata/`
pub fn metadata_rel_dir() -> PathBuf {
    PathBuf::from(METADATA_DIR_NAME)
}

/// Relative path: `metadata/version-hint.text`
pub fn version_hint_rel_path() -> PathBuf {
    metadata_rel_dir().join(VERSION_HINT_FILE_NAME)
}

/// File name `<%012d sequence>-<id>.metadata.json`.
pub fn metadata_file_name(sequence_number: i64, id: Uuid) -> String {
    format!(
        "{:0width$}-{id}{METADATA_FILE_SUFFIX}",
        sequence_number,
        width = METADATA_SEQUENCE_DIGITS
    )
}

/// Relative path: `metadata/<file_name>`
pub fn metadata_rel_path(file_name: &str) -> PathBuf {
    metadata_rel_dir().join(file_name)
}

/// Sequence number embedded in a metadata file name, if it has one.
pub fn metadata_file_sequence(file_name: &str) -> Option<i64> {
    let stem = file_name.strip_suffix(METADATA_FILE_SUFFIX)?;
    let (digits, _) = stem.split_once('-')?;
    digits.parse().ok()
}

/// Relative path: `metadata/man-<id>.avro`
pub fn manifest_rel_path(id: Uuid) -> PathBuf {
    metadata_rel_dir().join(format!("man-{id}.avro"))
}

/// Relative path: `metadata/snap-<id>.avro`
pub fn manifest_list_rel_path(id: Uuid) -> PathBuf {
    metadata_rel_dir().join(format!("snap-{id}.avro"))
}

/// Fresh opaque id for a metadata, manifest or manifest-list file.
///
/// UUIDv7 keeps names roughly time-ordered in listings.
pub fn new_file_id() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_file_name_is_zero_padded_and_parseable() {
        let id = Uuid::nil();
        let name = metadata_file_name(7, id);

        assert_eq!(
            name,
            "000000000007-00000000-0000-0000-0000-000000000000.metadata.json"
        );
        assert_eq!(metadata_file_sequence(&name), Some(7));
        assert_eq!(metadata_file_sequence("version-hint.text"), None);
        assert_eq!(metadata_file_sequence("abc-x.metadata.json"), None);
    }

    #[test]
    fn manifest_paths_live_under_metadata() {
        let id = new_file_id();
        assert!(manifest_rel_path(id).starts_with(METADATA_DIR_NAME));
        assert!(manifest_list_rel_path(id).starts_with(METADATA_DIR_NAME));
        assert_ne!(manifest_rel_path(id), manifest_list_rel_path(id));
    }
}
