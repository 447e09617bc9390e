//! Read-only listings of the files a table references.

use std::collections::BTreeSet;

use log::debug;
use serde::Serialize;
use snafu::prelude::*;

use crate::{
    catalog::VersionHintCatalog,
    metadata::{ManifestContent, Snapshot, TableMetadata},
    storage::{self, TableLocation, layout},
    table::{
        error::{CorruptMetadataSnafu, StorageSnafu, TableError},
        manifests,
    },
};

/// What [`reachable_files`] walks and reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReachableFilesOptions {
    /// Walk every snapshot in the metadata instead of only the current one.
    pub all_snapshots: bool,
    /// Report data files only, without manifest lists, manifests and the
    /// metadata document.
    pub data_only: bool,
    /// Also walk delete manifests.
    pub include_deletes: bool,
}

/// Every file reachable from the current snapshot (or from all snapshots),
/// as a sorted set of URIs.
///
/// Entries of every status are included, so files only referenced as
/// DELETED by a retained snapshot are still reported.
pub async fn reachable_files(
    location: &TableLocation,
    options: &ReachableFilesOptions,
    io_concurrency: usize,
) -> Result<BTreeSet<String>, TableError> {
    let table = VersionHintCatalog::new(location.clone()).load_table().await?;
    let snapshots: Vec<&Snapshot> = if options.all_snapshots {
        table.metadata().snapshots.iter().collect()
    } else {
        table.current_snapshot().into_iter().collect()
    };

    let mut files = BTreeSet::new();
    if !options.data_only {
        files.insert(table.metadata_uri());
    }

    for snapshot in snapshots {
        if !options.data_only {
            files.insert(snapshot.manifest_list.clone());
        }
        let listed: Vec<_> = manifests::read_manifest_list(location, &snapshot.manifest_list)
            .await?
            .into_iter()
            .filter(|m| options.include_deletes || m.content != ManifestContent::Deletes)
            .collect();
        let loaded = manifests::load_manifests_with_entries(location, listed, io_concurrency).await?;

        for manifest in loaded {
            if !options.data_only {
                files.insert(manifest.manifest.manifest_path);
            }
            files.extend(manifest.entries.into_iter().map(|e| e.data_file.file_path));
        }
    }

    debug!("{} files reachable from {}", files.len(), location.uri());
    Ok(files)
}

/// Data files of one manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestDataFiles {
    /// Manifest URI.
    pub manifest_path: String,
    /// Data file URIs, in manifest order, all statuses included.
    pub data_files: Vec<String>,
}

/// Files behind the current snapshot of one metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotFiles {
    /// Metadata document URI.
    pub metadata_file: String,
    /// Sequence number of the current snapshot.
    pub sequence_number: i64,
    /// Current snapshot id.
    pub snapshot_id: i64,
    /// Manifest list URI.
    pub manifest_list: String,
    /// Manifests of the list, in order.
    pub manifests: Vec<ManifestDataFiles>,
}

/// List every metadata document under `metadata/` and describe the files
/// behind its current snapshot, ordered by sequence number.
///
/// Documents without a snapshot (the one written at creation, typically)
/// are skipped. Orphaned documents from lost commit races are included.
pub async fn list_snapshot_files(
    location: &TableLocation,
    io_concurrency: usize,
) -> Result<Vec<SnapshotFiles>, TableError> {
    let objects = storage::list_prefix(location.storage(), &layout::metadata_rel_dir())
        .await
        .context(StorageSnafu)?;

    let mut out = Vec::new();
    for object in objects {
        let is_metadata = object
            .rel_path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(layout::METADATA_FILE_SUFFIX));
        if !is_metadata {
            continue;
        }

        let metadata_file = location.uri_for(&object.rel_path);
        let json = storage::read_to_string(location.storage(), &object.rel_path)
            .await
            .context(StorageSnafu)?;
        let metadata: TableMetadata = serde_json::from_str(&json).map_err(|e| {
            CorruptMetadataSnafu {
                msg: format!("failed to parse {metadata_file}: {e}"),
            }
            .build()
        })?;
        let Some(snapshot) = metadata.current_snapshot() else {
            continue;
        };

        let listed = manifests::read_manifest_list(location, &snapshot.manifest_list).await?;
        let loaded = manifests::load_manifests_with_entries(location, listed, io_concurrency).await?;
        out.push(SnapshotFiles {
            metadata_file,
            sequence_number: snapshot.sequence_number,
            snapshot_id: snapshot.snapshot_id,
            manifest_list: snapshot.manifest_list.clone(),
            manifests: loaded
                .into_iter()
                .map(|m| ManifestDataFiles {
                    manifest_path: m.manifest.manifest_path,
                    data_files: m.entries.into_iter().map(|e| e.data_file.file_path).collect(),
                })
                .collect(),
        });
    }

    out.sort_by_key(|s| s.sequence_number);
    Ok(out)
}
