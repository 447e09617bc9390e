//! Reading and writing manifests and manifest lists of a table.

use std::path::PathBuf;

use futures::{StreamExt, TryStreamExt, stream};
use log::debug;
use snafu::prelude::*;

use crate::formats::avro::{self, ManifestListMetadata, ManifestMetadata};
use crate::metadata::{ManifestContent, ManifestEntry, ManifestFile, ManifestStatus, Schema};
use crate::storage::{self, TableLocation, layout};
use crate::table::Table;
use crate::table::error::{FileOutsideTablePrefixSnafu, ManifestSnafu, StorageSnafu, TableError};

/// A manifest together with its decoded entries (inheritance applied).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestWithEntries {
    /// The manifest-list row.
    pub manifest: ManifestFile,
    /// Its entries, in file order.
    pub entries: Vec<ManifestEntry>,
}

impl ManifestWithEntries {
    /// ADDED and EXISTING entries.
    pub fn live_entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| e.is_live())
    }
}

fn rel_path_for(location: &TableLocation, uri: &str) -> Result<PathBuf, TableError> {
    location.relative_path(uri).context(FileOutsideTablePrefixSnafu {
        path: uri,
        prefix: location.uri(),
    })
}

/// Decode the manifest list at `uri`.
pub async fn read_manifest_list(
    location: &TableLocation,
    uri: &str,
) -> Result<Vec<ManifestFile>, TableError> {
    let rel = rel_path_for(location, uri)?;
    let bytes = storage::read_all_bytes(location.storage(), &rel)
        .await
        .context(StorageSnafu)?;
    avro::decode_manifest_list(&bytes).context(ManifestSnafu { path: uri })
}

/// Decode the entries of `manifest`, filling inherited snapshot ids and
/// sequence numbers from the manifest-list row.
pub async fn read_manifest_entries(
    location: &TableLocation,
    manifest: &ManifestFile,
) -> Result<Vec<ManifestEntry>, TableError> {
    let uri = manifest.manifest_path.as_str();
    let rel = rel_path_for(location, uri)?;
    let bytes = storage::read_all_bytes(location.storage(), &rel)
        .await
        .context(StorageSnafu)?;
    let mut entries = avro::decode_manifest(&bytes).context(ManifestSnafu { path: uri })?;
    for entry in &mut entries {
        entry.inherit_from(manifest);
    }
    Ok(entries)
}

/// Fetch the entries of every manifest, at most `concurrency` at a time,
/// keeping the manifest-list order.
pub async fn load_manifests_with_entries(
    location: &TableLocation,
    manifests: Vec<ManifestFile>,
    concurrency: usize,
) -> Result<Vec<ManifestWithEntries>, TableError> {
    stream::iter(manifests)
        .map(|manifest| async move {
            let entries = read_manifest_entries(location, &manifest).await?;
            Ok::<_, TableError>(ManifestWithEntries { manifest, entries })
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}

/// Manifests of the current snapshot (empty when the table has none).
pub(crate) async fn current_manifests(table: &Table) -> Result<Vec<ManifestFile>, TableError> {
    match table.current_snapshot() {
        Some(snapshot) => read_manifest_list(table.location(), &snapshot.manifest_list).await,
        None => Ok(Vec::new()),
    }
}

/// Manifests of the current snapshot with their entries.
pub async fn load_current_manifests(
    table: &Table,
    concurrency: usize,
) -> Result<Vec<ManifestWithEntries>, TableError> {
    let listed = current_manifests(table).await?;
    load_manifests_with_entries(table.location(), listed, concurrency).await
}

/// Write `entries` as a new data manifest and describe it for a manifest
/// list written by snapshot `snapshot_id` at `sequence_number`.
pub(crate) async fn write_manifest(
    location: &TableLocation,
    schema: &Schema,
    snapshot_id: i64,
    sequence_number: i64,
    entries: &[ManifestEntry],
) -> Result<ManifestFile, TableError> {
    let rel = layout::manifest_rel_path(layout::new_file_id());
    let uri = location.uri_for(&rel);
    let bytes = avro::encode_manifest(
        entries,
        &ManifestMetadata {
            schema,
            content: ManifestContent::Data,
        },
    )
    .context(ManifestSnafu { path: uri.clone() })?;
    storage::write_new(location.storage(), &rel, &bytes)
        .await
        .context(StorageSnafu)?;

    let mut manifest = ManifestFile {
        manifest_path: uri,
        manifest_length: i64::try_from(bytes.len()).unwrap_or(i64::MAX),
        partition_spec_id: 0,
        content: ManifestContent::Data,
        sequence_number,
        min_sequence_number: entries
            .iter()
            .filter_map(|e| e.sequence_number)
            .min()
            .unwrap_or(sequence_number),
        added_snapshot_id: snapshot_id,
        added_files_count: 0,
        existing_files_count: 0,
        deleted_files_count: 0,
        added_rows_count: 0,
        existing_rows_count: 0,
        deleted_rows_count: 0,
    };
    for entry in entries {
        let rows = entry.data_file.record_count;
        match entry.status {
            ManifestStatus::Added => {
                manifest.added_files_count += 1;
                manifest.added_rows_count += rows;
            }
            ManifestStatus::Existing => {
                manifest.existing_files_count += 1;
                manifest.existing_rows_count += rows;
            }
            ManifestStatus::Deleted => {
                manifest.deleted_files_count += 1;
                manifest.deleted_rows_count += rows;
            }
        }
    }

    debug!(
        "wrote manifest {} ({} added, {} existing, {} deleted)",
        manifest.manifest_path,
        manifest.added_files_count,
        manifest.existing_files_count,
        manifest.deleted_files_count
    );
    Ok(manifest)
}

/// Write a manifest list and return its URI.
pub(crate) async fn write_manifest_list(
    location: &TableLocation,
    metadata: ManifestListMetadata,
    manifests: &[ManifestFile],
) -> Result<String, TableError> {
    let rel = layout::manifest_list_rel_path(layout::new_file_id());
    let uri = location.uri_for(&rel);
    let bytes = avro::encode_manifest_list(manifests, metadata)
        .context(ManifestSnafu { path: uri.clone() })?;
    storage::write_new(location.storage(), &rel, &bytes)
        .await
        .context(StorageSnafu)?;

    debug!("wrote manifest list {uri} with {} manifests", manifests.len());
    Ok(uri)
}
