//! Replace: substitute live data files with new ones, N to M.
//!
//! Unlike merge, touched manifests are not pooled. Each is rewritten on its
//! own, keeping its other live entries as EXISTING and recording the
//! replaced inputs as DELETED. The outputs (if any) land in one new manifest.

use std::collections::{HashMap, HashSet};

use snafu::prelude::*;

use crate::{
    catalog::{VersionHintCatalog, do_commit},
    formats::parquet::{self, ParquetFooter},
    metadata::{DataFile, ManifestEntry, ManifestFile, Operation},
    storage::TableLocation,
    table::{
        OperationConfig, Table,
        append::{resolve_data_paths, validate_footers},
        error::{
            EmptyOperationSnafu, FileOutsideTablePrefixSnafu, ParquetFooterSnafu, TableError,
        },
        manifests::{self, ManifestWithEntries},
        merge::{InputIndex, check_outputs},
        snapshot_producer::{SnapshotProducer, SummaryDelta},
    },
};

/// Result of [`plan_replace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacePlan {
    /// Manifests without any input, kept unchanged.
    pub carried: Vec<ManifestFile>,
    /// One entry list per touched manifest, in manifest-list order.
    pub rewritten: Vec<Vec<ManifestEntry>>,
    /// ADDED entries for the outputs; empty when there are none.
    pub added: Vec<ManifestEntry>,
    pub(crate) delta: SummaryDelta,
}

/// Plan the replacement of `inputs` (absolute URIs) by `outputs`.
pub fn plan_replace(
    manifests: &[ManifestWithEntries],
    inputs: &[String],
    outputs: Vec<DataFile>,
    snapshot_id: i64,
) -> Result<ReplacePlan, TableError> {
    ensure!(
        !inputs.is_empty(),
        EmptyOperationSnafu {
            msg: "replace without input files",
        }
    );

    let mut index = InputIndex::new(inputs)?;
    let mut live = HashSet::new();
    let mut carried = Vec::new();
    let mut rewritten = Vec::new();
    let mut delta = SummaryDelta::default();

    for manifest in manifests {
        if !index.touches(manifest) {
            carried.push(manifest.manifest.clone());
            live.extend(manifest.live_entries().map(|e| e.data_file.file_path.as_str()));
            continue;
        }
        let mut entries = Vec::with_capacity(manifest.entries.len());
        for entry in manifest.live_entries() {
            let path = entry.data_file.file_path.as_str();
            if index.record(path) {
                delta.delete(&entry.data_file);
                entries.push(entry.to_deleted(snapshot_id));
            } else {
                live.insert(path);
                entries.push(entry.to_existing());
            }
        }
        rewritten.push(entries);
    }
    index.finish()?;
    check_outputs(&live, &outputs)?;

    let added = outputs
        .into_iter()
        .map(|output| {
            delta.add(&output);
            ManifestEntry::added(snapshot_id, output)
        })
        .collect();

    Ok(ReplacePlan {
        carried,
        rewritten,
        added,
        delta,
    })
}

/// Replace `inputs` (absolute URIs) by the already written `outputs` in a
/// single commit attempt. Snapshot operation `overwrite`.
pub async fn replace_in_table(
    catalog: &VersionHintCatalog,
    table: &Table,
    inputs: &[String],
    outputs: &[ParquetFooter],
    properties: &HashMap<String, String>,
    io_concurrency: usize,
) -> Result<Table, TableError> {
    let location = table.location();
    let schema = table.current_schema()?;
    for input in inputs {
        ensure!(
            location.is_data_uri(input),
            FileOutsideTablePrefixSnafu {
                path: input.as_str(),
                prefix: location.data_prefix(),
            }
        );
    }
    validate_footers(location, schema, outputs)?;

    let current = manifests::current_manifests(table).await?;
    let loaded = manifests::load_manifests_with_entries(location, current, io_concurrency).await?;

    let producer = SnapshotProducer::new(table, Operation::Overwrite);
    let data_files = outputs.iter().map(|f| f.to_data_file(schema)).collect();
    let plan = plan_replace(&loaded, inputs, data_files, producer.snapshot_id())?;

    let mut manifest_list = plan.carried;
    for entries in &plan.rewritten {
        manifest_list.push(producer.write_manifest(entries).await?);
    }
    if !plan.added.is_empty() {
        manifest_list.push(producer.write_manifest(&plan.added).await?);
    }

    producer
        .commit(catalog, &manifest_list, plan.delta, properties)
        .await
}

/// Replace files given relative to `data/`, retrying on commit conflicts.
/// `outputs` may be empty, which removes the inputs from the table.
pub async fn replace_files<S: AsRef<str>>(
    location: &TableLocation,
    inputs: &[S],
    outputs: &[S],
    properties: &HashMap<String, String>,
    config: &OperationConfig,
) -> Result<Table, TableError> {
    ensure!(
        !inputs.is_empty(),
        EmptyOperationSnafu {
            msg: "replace without input files",
        }
    );
    let inputs: Vec<String> = resolve_data_paths(location, inputs)?
        .iter()
        .map(|rel| location.uri_for(rel))
        .collect();
    let output_paths = resolve_data_paths(location, outputs)?;
    let outputs = parquet::read_footers(location, &output_paths, config.io_concurrency)
        .await
        .context(ParquetFooterSnafu)?;

    let catalog = &VersionHintCatalog::new(location.clone());
    let (inputs, outputs) = (inputs.as_slice(), outputs.as_slice());
    let io_concurrency = config.io_concurrency;

    do_commit(&config.retry, move || async move {
        let table = catalog.load_table().await?;
        replace_in_table(catalog, &table, inputs, outputs, properties, io_concurrency).await
    })
    .await
}
