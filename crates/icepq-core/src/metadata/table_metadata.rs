//! The table metadata document (`metadata/*.metadata.json`).
//!
//! A metadata document is immutable once written. Every commit produces a
//! new document whose file name embeds the table's last sequence number, and
//! the version hint is switched to name it.
//!
//! Tables created here are always format version 2, unpartitioned and
//! unsorted. Documents produced by other writers are read as long as they use
//! the same JSON layout; partition and sort fields are carried through
//! untouched.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::metadata::{
    schema::Schema,
    snapshot::{Snapshot, SnapshotReference},
};

/// Table format version written by this crate.
pub const FORMAT_VERSION: i32 = 2;

/// Name of the branch that tracks the current snapshot.
pub const MAIN_BRANCH: &str = "main";

/// Id of the single unpartitioned partition spec.
pub const DEFAULT_SPEC_ID: i32 = 0;

/// Id of the single unsorted sort order.
pub const DEFAULT_SORT_ORDER_ID: i64 = 0;

/// `last-partition-id` of a table that never had a partition field.
pub const UNPARTITIONED_LAST_PARTITION_ID: i32 = 999;

/// One field of a partition spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionField {
    /// Source column id.
    pub source_id: i32,
    /// Partition field id.
    pub field_id: i32,
    /// Partition field name.
    pub name: String,
    /// Transform name (for example `identity` or `day`).
    pub transform: String,
}

/// A partition spec. Tables created here only use the empty spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionSpec {
    /// Spec id.
    pub spec_id: i32,
    /// Partition fields (empty when unpartitioned).
    #[serde(default)]
    pub fields: Vec<PartitionField>,
}

impl PartitionSpec {
    /// The unpartitioned spec.
    pub fn unpartitioned() -> Self {
        PartitionSpec {
            spec_id: DEFAULT_SPEC_ID,
            fields: Vec::new(),
        }
    }
}

/// One field of a sort order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SortField {
    /// Source column id.
    pub source_id: i32,
    /// Transform name.
    pub transform: String,
    /// `asc` or `desc`.
    pub direction: String,
    /// `nulls-first` or `nulls-last`.
    pub null_order: String,
}

/// A sort order. Tables created here only use the unsorted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SortOrder {
    /// Order id.
    pub order_id: i64,
    /// Sort fields (empty when unsorted).
    #[serde(default)]
    pub fields: Vec<SortField>,
}

impl SortOrder {
    /// The unsorted order.
    pub fn unsorted() -> Self {
        SortOrder {
            order_id: DEFAULT_SORT_ORDER_ID,
            fields: Vec::new(),
        }
    }
}

/// Entry of the snapshot log: when each snapshot became current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SnapshotLogEntry {
    /// Snapshot that became current.
    pub snapshot_id: i64,
    /// When it became current.
    pub timestamp_ms: i64,
}

/// Entry of the metadata log: previous metadata documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MetadataLogEntry {
    /// Absolute URI of the previous metadata document.
    pub metadata_file: String,
    /// `last-updated-ms` of that document.
    pub timestamp_ms: i64,
}

/// Full table metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TableMetadata {
    /// Always 2 for tables written here.
    pub format_version: i32,
    /// Identity of the table; never changes.
    pub table_uuid: Uuid,
    /// Table root URI.
    pub location: String,
    /// Highest sequence number assigned to any snapshot.
    pub last_sequence_number: i64,
    /// Time of the last metadata change.
    pub last_updated_ms: i64,
    /// Highest field id ever assigned.
    pub last_column_id: i32,
    /// Known schemas.
    pub schemas: Vec<Schema>,
    /// Id of the schema new data must match.
    pub current_schema_id: i32,
    /// Known partition specs.
    pub partition_specs: Vec<PartitionSpec>,
    /// Spec used for new data.
    pub default_spec_id: i32,
    /// Highest partition field id ever assigned.
    pub last_partition_id: i32,
    /// Table properties.
    #[serde(default)]
    pub properties: HashMap<String, String>,
    /// Current snapshot, if any. Writers that encode "none" as `-1` are
    /// accepted.
    #[serde(
        default,
        deserialize_with = "deserialize_snapshot_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_snapshot_id: Option<i64>,
    /// All snapshots.
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
    /// History of the current snapshot.
    #[serde(default)]
    pub snapshot_log: Vec<SnapshotLogEntry>,
    /// Previous metadata documents.
    #[serde(default)]
    pub metadata_log: Vec<MetadataLogEntry>,
    /// Known sort orders.
    pub sort_orders: Vec<SortOrder>,
    /// Order used for new data.
    pub default_sort_order_id: i64,
    /// Named references (`main` tracks the current snapshot).
    #[serde(default)]
    pub refs: HashMap<String, SnapshotReference>,
}

fn deserialize_snapshot_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<i64>, D::Error> {
    let id = Option::<i64>::deserialize(deserializer)?;
    Ok(id.filter(|id| *id >= 0))
}

impl TableMetadata {
    /// Metadata for a brand-new table: sequence 0, no snapshot, schema id 0,
    /// unpartitioned and unsorted.
    pub fn new(
        location: impl Into<String>,
        schema: Schema,
        properties: HashMap<String, String>,
        now_ms: i64,
    ) -> Self {
        let schema = Schema::new(0, schema.fields);
        TableMetadata {
            format_version: FORMAT_VERSION,
            table_uuid: Uuid::now_v7(),
            location: location.into(),
            last_sequence_number: 0,
            last_updated_ms: now_ms,
            last_column_id: schema.highest_field_id(),
            current_schema_id: schema.schema_id,
            schemas: vec![schema],
            partition_specs: vec![PartitionSpec::unpartitioned()],
            default_spec_id: DEFAULT_SPEC_ID,
            last_partition_id: UNPARTITIONED_LAST_PARTITION_ID,
            properties,
            current_snapshot_id: None,
            snapshots: Vec::new(),
            snapshot_log: Vec::new(),
            metadata_log: Vec::new(),
            sort_orders: vec![SortOrder::unsorted()],
            default_sort_order_id: DEFAULT_SORT_ORDER_ID,
            refs: HashMap::new(),
        }
    }

    /// The schema new data must match.
    pub fn current_schema(&self) -> Option<&Schema> {
        self.schemas
            .iter()
            .find(|s| s.schema_id == self.current_schema_id)
    }

    /// The current snapshot, if the table has one.
    pub fn current_snapshot(&self) -> Option<&Snapshot> {
        self.current_snapshot_id
            .and_then(|id| self.snapshot_by_id(id))
    }

    /// Look up a snapshot by id.
    pub fn snapshot_by_id(&self, snapshot_id: i64) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.snapshot_id == snapshot_id)
    }

    /// Sequence number the next snapshot must carry.
    pub fn next_sequence_number(&self) -> i64 {
        self.last_sequence_number + 1
    }

    /// A snapshot id derived from `now_ms` that is strictly greater than
    /// every existing snapshot id, even when the clock has not advanced (or
    /// went backwards) since the last commit.
    pub fn next_snapshot_id(&self, now_ms: i64) -> i64 {
        let floor = self
            .snapshots
            .iter()
            .map(|s| s.snapshot_id)
            .max()
            .map_or(i64::MIN, |max| max.saturating_add(1));
        now_ms.max(floor)
    }
}
