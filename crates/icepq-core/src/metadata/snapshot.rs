//! Snapshots and branch references.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Kind of change a snapshot introduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Only data files were added.
    Append,
    /// Data files were rewritten without changing table contents (compaction).
    Replace,
    /// Data files were both removed and added.
    Overwrite,
    /// Data files were removed.
    Delete,
}

impl Operation {
    /// The lowercase name stored in snapshot summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Append => "append",
            Operation::Replace => "replace",
            Operation::Overwrite => "overwrite",
            Operation::Delete => "delete",
        }
    }
}

/// Well-known summary keys.
pub mod summary_keys {
    /// Data files added by the snapshot.
    pub const ADDED_DATA_FILES: &str = "added-data-files";
    /// Data files removed by the snapshot.
    pub const DELETED_DATA_FILES: &str = "deleted-data-files";
    /// Records in added data files.
    pub const ADDED_RECORDS: &str = "added-records";
    /// Records in removed data files.
    pub const DELETED_RECORDS: &str = "deleted-records";
    /// Bytes of added data files.
    pub const ADDED_FILES_SIZE: &str = "added-files-size";
    /// Bytes of removed data files.
    pub const REMOVED_FILES_SIZE: &str = "removed-files-size";
    /// Live data files after the snapshot.
    pub const TOTAL_DATA_FILES: &str = "total-data-files";
    /// Live records after the snapshot.
    pub const TOTAL_RECORDS: &str = "total-records";
    /// Live data bytes after the snapshot.
    pub const TOTAL_FILES_SIZE: &str = "total-files-size";
}

/// Snapshot summary: the operation plus free-form string properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Operation that produced the snapshot.
    pub operation: Operation,
    /// Metrics and caller-supplied snapshot properties.
    #[serde(flatten)]
    pub additional_properties: HashMap<String, String>,
}

impl Summary {
    /// Build a summary with no additional properties.
    pub fn new(operation: Operation) -> Self {
        Summary {
            operation,
            additional_properties: HashMap::new(),
        }
    }

    /// Parse a numeric summary property.
    pub fn metric(&self, key: &str) -> Option<i64> {
        self.additional_properties.get(key)?.parse().ok()
    }
}

/// An immutable view of the table at one point in its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Snapshot {
    /// Unique, increasing snapshot id.
    pub snapshot_id: i64,
    /// Id of the snapshot this one was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_snapshot_id: Option<i64>,
    /// Sequence number; exactly one more than the parent's.
    pub sequence_number: i64,
    /// Commit time in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Absolute URI of the manifest list.
    pub manifest_list: String,
    /// Operation and metrics.
    pub summary: Summary,
    /// Schema current when the snapshot was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<i32>,
}

/// Kind of a named snapshot reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotRefType {
    /// A mutable reference that moves forward with commits.
    Branch,
    /// An immutable reference.
    Tag,
}

/// A named pointer to a snapshot (for example the `main` branch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SnapshotReference {
    /// Referenced snapshot.
    pub snapshot_id: i64,
    /// Branch or tag.
    #[serde(rename = "type")]
    pub ref_type: SnapshotRefType,
}

impl SnapshotReference {
    /// A branch reference to `snapshot_id`.
    pub fn branch(snapshot_id: i64) -> Self {
        SnapshotReference {
            snapshot_id,
            ref_type: SnapshotRefType::Branch,
        }
    }
}
