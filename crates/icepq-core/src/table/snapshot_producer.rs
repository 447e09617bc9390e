//! Shared tail of every mutating operation: summary metrics, manifest list,
//! snapshot and the catalog commit.

use std::collections::HashMap;

use chrono::Utc;
use log::info;

use crate::catalog::{TableRequirement, TableUpdate, VersionHintCatalog};
use crate::formats::avro::ManifestListMetadata;
use crate::metadata::{
    DataFile, MAIN_BRANCH, ManifestEntry, ManifestFile, Operation, Snapshot, SnapshotReference,
    Summary, snapshot::summary_keys,
};
use crate::table::{Table, TableError, manifests};

/// Data-file counters accumulated while planning an operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SummaryDelta {
    pub(crate) added_files: i64,
    pub(crate) deleted_files: i64,
    pub(crate) added_records: i64,
    pub(crate) deleted_records: i64,
    pub(crate) added_size: i64,
    pub(crate) removed_size: i64,
}

impl SummaryDelta {
    pub(crate) fn add(&mut self, file: &DataFile) {
        self.added_files += 1;
        self.added_records += file.record_count;
        self.added_size += file.file_size_in_bytes;
    }

    pub(crate) fn delete(&mut self, file: &DataFile) {
        self.deleted_files += 1;
        self.deleted_records += file.record_count;
        self.removed_size += file.file_size_in_bytes;
    }

    /// Summary for a snapshot whose parent has `previous` as summary.
    ///
    /// Totals are carried only when the parent has them (or when there is no
    /// parent); caller properties are merged last.
    fn to_summary(
        self,
        operation: Operation,
        previous: Option<&Summary>,
        properties: &HashMap<String, String>,
    ) -> Summary {
        let mut summary = Summary::new(operation);
        let props = &mut summary.additional_properties;

        let mut put = |key: &str, value: i64| {
            props.insert(key.to_string(), value.to_string());
        };
        if self.added_files > 0 {
            put(summary_keys::ADDED_DATA_FILES, self.added_files);
            put(summary_keys::ADDED_RECORDS, self.added_records);
            put(summary_keys::ADDED_FILES_SIZE, self.added_size);
        }
        if self.deleted_files > 0 {
            put(summary_keys::DELETED_DATA_FILES, self.deleted_files);
            put(summary_keys::DELETED_RECORDS, self.deleted_records);
            put(summary_keys::REMOVED_FILES_SIZE, self.removed_size);
        }

        let total = |key: &str, delta: i64| match previous {
            None => Some(delta),
            Some(prev) => prev.metric(key).map(|v| v + delta),
        };
        let totals = [
            (
                summary_keys::TOTAL_DATA_FILES,
                total(
                    summary_keys::TOTAL_DATA_FILES,
                    self.added_files - self.deleted_files,
                ),
            ),
            (
                summary_keys::TOTAL_RECORDS,
                total(
                    summary_keys::TOTAL_RECORDS,
                    self.added_records - self.deleted_records,
                ),
            ),
            (
                summary_keys::TOTAL_FILES_SIZE,
                total(
                    summary_keys::TOTAL_FILES_SIZE,
                    self.added_size - self.removed_size,
                ),
            ),
        ];
        for (key, value) in totals {
            if let Some(value) = value {
                put(key, value);
            }
        }

        props.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        summary
    }
}

/// Identity of the snapshot an operation is producing on top of `table`.
pub(crate) struct SnapshotProducer<'a> {
    table: &'a Table,
    operation: Operation,
    snapshot_id: i64,
    sequence_number: i64,
    timestamp_ms: i64,
}

impl<'a> SnapshotProducer<'a> {
    pub(crate) fn new(table: &'a Table, operation: Operation) -> Self {
        let now_ms = Utc::now().timestamp_millis();
        let metadata = table.metadata();
        SnapshotProducer {
            table,
            operation,
            snapshot_id: metadata.next_snapshot_id(now_ms),
            sequence_number: metadata.next_sequence_number(),
            timestamp_ms: now_ms,
        }
    }

    pub(crate) fn snapshot_id(&self) -> i64 {
        self.snapshot_id
    }

    /// Write `entries` as one new manifest owned by this snapshot.
    pub(crate) async fn write_manifest(
        &self,
        entries: &[ManifestEntry],
    ) -> Result<ManifestFile, TableError> {
        manifests::write_manifest(
            self.table.location(),
            self.table.current_schema()?,
            self.snapshot_id,
            self.sequence_number,
            entries,
        )
        .await
    }

    /// Write the manifest list and commit the snapshot on `main`.
    ///
    /// The commit requires `main` to still point at the snapshot the plan was
    /// built from.
    pub(crate) async fn commit(
        self,
        catalog: &VersionHintCatalog,
        manifests: &[ManifestFile],
        delta: SummaryDelta,
        properties: &HashMap<String, String>,
    ) -> Result<Table, TableError> {
        let metadata = self.table.metadata();
        let parent = self.table.current_snapshot();
        let parent_snapshot_id = parent.map(|s| s.snapshot_id);

        let manifest_list = manifests::write_manifest_list(
            self.table.location(),
            ManifestListMetadata {
                snapshot_id: self.snapshot_id,
                parent_snapshot_id,
                sequence_number: self.sequence_number,
            },
            manifests,
        )
        .await?;

        let snapshot = Snapshot {
            snapshot_id: self.snapshot_id,
            parent_snapshot_id,
            sequence_number: self.sequence_number,
            timestamp_ms: self.timestamp_ms,
            manifest_list,
            summary: delta.to_summary(self.operation, parent.map(|s| &s.summary), properties),
            schema_id: Some(metadata.current_schema_id),
        };

        let requirements = [
            TableRequirement::AssertTableUuid {
                uuid: metadata.table_uuid,
            },
            TableRequirement::main_unchanged(metadata),
        ];
        let updates = vec![
            TableUpdate::AddSnapshot { snapshot },
            TableUpdate::SetSnapshotRef {
                ref_name: MAIN_BRANCH.to_string(),
                reference: SnapshotReference::branch(self.snapshot_id),
            },
        ];

        let committed = catalog
            .commit_table(self.table, &requirements, updates)
            .await?;
        info!(
            "{} snapshot {} committed at sequence {} ({} added, {} deleted data files)",
            self.operation.as_str(),
            self.snapshot_id,
            self.sequence_number,
            delta.added_files,
            delta.deleted_files
        );
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{DataContentType, DataFileFormat};
    use std::collections::BTreeMap;

    fn file(rows: i64, size: i64) -> DataFile {
        DataFile {
            content: DataContentType::Data,
            file_path: "/t/data/x.parquet".to_string(),
            file_format: DataFileFormat::Parquet,
            record_count: rows,
            file_size_in_bytes: size,
            lower_bounds: BTreeMap::new(),
            upper_bounds: BTreeMap::new(),
        }
    }

    #[test]
    fn summary_tracks_deltas_and_totals() {
        let mut first = SummaryDelta::default();
        first.add(&file(10, 100));
        first.add(&file(20, 200));
        let first = first.to_summary(Operation::Append, None, &HashMap::new());
        assert_eq!(first.metric(summary_keys::ADDED_DATA_FILES), Some(2));
        assert_eq!(first.metric(summary_keys::TOTAL_RECORDS), Some(30));

        let mut merge = SummaryDelta::default();
        merge.delete(&file(10, 100));
        merge.delete(&file(20, 200));
        merge.add(&file(30, 250));
        let props = HashMap::from([("job".to_string(), "compact".to_string())]);
        let second = merge.to_summary(Operation::Replace, Some(&first), &props);

        assert_eq!(second.metric(summary_keys::DELETED_DATA_FILES), Some(2));
        assert_eq!(second.metric(summary_keys::TOTAL_DATA_FILES), Some(1));
        assert_eq!(second.metric(summary_keys::TOTAL_RECORDS), Some(30));
        assert_eq!(second.metric(summary_keys::TOTAL_FILES_SIZE), Some(250));
        assert_eq!(
            second.additional_properties.get("job").map(String::as_str),
            Some("compact")
        );
    }

    #[test]
    fn totals_are_omitted_when_parent_lacks_them() {
        let mut delta = SummaryDelta::default();
        delta.add(&file(1, 1));
        let parent = Summary::new(Operation::Append);
        let summary = delta.to_summary(Operation::Append, Some(&parent), &HashMap::new());

        assert_eq!(summary.metric(summary_keys::ADDED_DATA_FILES), Some(1));
        assert_eq!(summary.metric(summary_keys::TOTAL_DATA_FILES), None);
    }
}
