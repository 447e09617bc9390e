//! Manifest lists, manifests and data file descriptors.
//!
//! A snapshot's manifest list names a set of manifests ([`ManifestFile`]);
//! each manifest holds [`ManifestEntry`] values that track one data file each
//! together with its lifecycle status.

use std::collections::BTreeMap;

/// Lifecycle status of a manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestStatus {
    /// Carried over from an earlier snapshot.
    Existing,
    /// Added by the snapshot that wrote the manifest.
    Added,
    /// Removed by the snapshot that wrote the manifest.
    Deleted,
}

impl ManifestStatus {
    /// Integer code stored in Avro.
    pub fn code(self) -> i32 {
        match self {
            ManifestStatus::Existing => 0,
            ManifestStatus::Added => 1,
            ManifestStatus::Deleted => 2,
        }
    }

    /// Decode an Avro status code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ManifestStatus::Existing),
            1 => Some(ManifestStatus::Added),
            2 => Some(ManifestStatus::Deleted),
            _ => None,
        }
    }
}

/// What a data file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataContentType {
    /// Table rows.
    Data,
    /// Position delete rows.
    PositionDeletes,
    /// Equality delete rows.
    EqualityDeletes,
}

impl DataContentType {
    /// Integer code stored in Avro.
    pub fn code(self) -> i32 {
        match self {
            DataContentType::Data => 0,
            DataContentType::PositionDeletes => 1,
            DataContentType::EqualityDeletes => 2,
        }
    }

    /// Decode an Avro content code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(DataContentType::Data),
            1 => Some(DataContentType::PositionDeletes),
            2 => Some(DataContentType::EqualityDeletes),
            _ => None,
        }
    }
}

/// What a manifest tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestContent {
    /// Data files.
    Data,
    /// Delete files.
    Deletes,
}

impl ManifestContent {
    /// Integer code stored in the manifest list.
    pub fn code(self) -> i32 {
        match self {
            ManifestContent::Data => 0,
            ManifestContent::Deletes => 1,
        }
    }

    /// Decode a manifest-list content code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ManifestContent::Data),
            1 => Some(ManifestContent::Deletes),
            _ => None,
        }
    }

    /// Value of the `content` key in manifest user metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            ManifestContent::Data => "data",
            ManifestContent::Deletes => "deletes",
        }
    }
}

/// File format of a data file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataFileFormat {
    /// Apache Parquet.
    Parquet,
    /// Apache Avro.
    Avro,
    /// Apache ORC.
    Orc,
    /// Anything else, kept verbatim.
    Other(String),
}

impl DataFileFormat {
    /// Upper-case name stored in manifests.
    pub fn as_str(&self) -> &str {
        match self {
            DataFileFormat::Parquet => "PARQUET",
            DataFileFormat::Avro => "AVRO",
            DataFileFormat::Orc => "ORC",
            DataFileFormat::Other(s) => s,
        }
    }

    /// Parse a manifest format name (case-insensitive).
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "PARQUET" => DataFileFormat::Parquet,
            "AVRO" => DataFileFormat::Avro,
            "ORC" => DataFileFormat::Orc,
            _ => DataFileFormat::Other(s.to_string()),
        }
    }
}

/// Descriptor of one data (or delete) file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    /// Data, position deletes or equality deletes.
    pub content: DataContentType,
    /// Absolute URI of the file.
    pub file_path: String,
    /// File format.
    pub file_format: DataFileFormat,
    /// Number of rows.
    pub record_count: i64,
    /// Size in bytes.
    pub file_size_in_bytes: i64,
    /// Per-field lower bounds, single-value serialized, keyed by field id.
    pub lower_bounds: BTreeMap<i32, Vec<u8>>,
    /// Per-field upper bounds, single-value serialized, keyed by field id.
    pub upper_bounds: BTreeMap<i32, Vec<u8>>,
}

/// One row of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Lifecycle status.
    pub status: ManifestStatus,
    /// Snapshot that added (or deleted) the file. `None` on disk means
    /// "inherit from the manifest".
    pub snapshot_id: Option<i64>,
    /// Data sequence number. `None` on disk means "inherit".
    pub sequence_number: Option<i64>,
    /// File sequence number. `None` on disk means "inherit".
    pub file_sequence_number: Option<i64>,
    /// The tracked file.
    pub data_file: DataFile,
}

impl ManifestEntry {
    /// An entry for a file added by `snapshot_id`. Sequence numbers are left
    /// for inheritance from the manifest that will hold the entry.
    pub fn added(snapshot_id: i64, data_file: DataFile) -> Self {
        ManifestEntry {
            status: ManifestStatus::Added,
            snapshot_id: Some(snapshot_id),
            sequence_number: None,
            file_sequence_number: None,
            data_file,
        }
    }

    /// The same file, re-recorded as EXISTING with its original snapshot id
    /// and sequence numbers.
    pub fn to_existing(&self) -> Self {
        ManifestEntry {
            status: ManifestStatus::Existing,
            ..self.clone()
        }
    }

    /// The same file, recorded as DELETED by `snapshot_id`. Sequence numbers
    /// keep the values of the original entry.
    pub fn to_deleted(&self, snapshot_id: i64) -> Self {
        ManifestEntry {
            status: ManifestStatus::Deleted,
            snapshot_id: Some(snapshot_id),
            ..self.clone()
        }
    }

    /// True for ADDED and EXISTING entries.
    pub fn is_live(&self) -> bool {
        self.status != ManifestStatus::Deleted
    }

    /// Fill inheritable fields from the manifest that holds this entry.
    ///
    /// Only ADDED entries may inherit sequence numbers; EXISTING and DELETED
    /// entries always carry them explicitly.
    pub fn inherit_from(&mut self, manifest: &ManifestFile) {
        if self.snapshot_id.is_none() {
            self.snapshot_id = Some(manifest.added_snapshot_id);
        }
        if self.status == ManifestStatus::Added {
            if self.sequence_number.is_none() {
                self.sequence_number = Some(manifest.sequence_number);
            }
            if self.file_sequence_number.is_none() {
                self.file_sequence_number = Some(manifest.sequence_number);
            }
        }
    }
}

/// One row of a manifest list: a manifest and its summary counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFile {
    /// Absolute URI of the manifest.
    pub manifest_path: String,
    /// Size of the manifest in bytes.
    pub manifest_length: i64,
    /// Partition spec used to write the manifest.
    pub partition_spec_id: i32,
    /// Data or deletes.
    pub content: ManifestContent,
    /// Sequence number of the snapshot that added the manifest.
    pub sequence_number: i64,
    /// Lowest data sequence number of any live entry.
    pub min_sequence_number: i64,
    /// Snapshot that added the manifest.
    pub added_snapshot_id: i64,
    /// Entries with status ADDED.
    pub added_files_count: i32,
    /// Entries with status EXISTING.
    pub existing_files_count: i32,
    /// Entries with status DELETED.
    pub deleted_files_count: i32,
    /// Rows in ADDED entries.
    pub added_rows_count: i64,
    /// Rows in EXISTING entries.
    pub existing_rows_count: i64,
    /// Rows in DELETED entries.
    pub deleted_rows_count: i64,
}
