//! Merge (compaction): replace groups of live data files with one new file
//! per group.
//!
//! Planning is a pure function over the decoded manifests ([`plan_merge`]).
//! Manifests that reference none of the inputs are carried forward as-is;
//! every other manifest is folded, together with the outputs, into exactly
//! one new manifest. Surviving entries keep their original snapshot id and
//! sequence numbers, so repeated merges never multiply the manifest count.

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
            DuplicateFileSnafu, EmptyOperationSnafu, FileOutsideTablePrefixSnafu,
            InputFileNotFoundSnafu, ParquetFooterSnafu, TableError,
        },
        manifests::{self, ManifestWithEntries},
        snapshot_producer::{SnapshotProducer, SummaryDelta},
    },
};

/// One merge group: `inputs` are replaced by `output`. Paths are relative to
/// `data/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOp {
    /// The already written replacement file.
    pub output: String,
    /// Live files it replaces.
    pub inputs: Vec<String>,
}

/// Result of [`plan_merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    /// Manifests without any input, kept in the new manifest list unchanged.
    pub carried: Vec<ManifestFile>,
    /// Entries of the single new manifest: EXISTING survivors of touched
    /// manifests, then one ADDED entry per output.
    pub entries: Vec<ManifestEntry>,
    pub(crate) delta: SummaryDelta,
}

/// Counts how often each declared input is matched by a live entry.
pub(crate) struct InputIndex<'a> {
    inputs: &'a [String],
    matches: HashMap<&'a str, usize>,
}

impl<'a> InputIndex<'a> {
    /// Fails on an input declared twice.
    pub(crate) fn new(inputs: &'a [String]) -> Result<Self, TableError> {
        let mut matches = HashMap::with_capacity(inputs.len());
        for input in inputs {
            ensure!(
                matches.insert(input.as_str(), 0).is_none(),
                DuplicateFileSnafu { path: input }
            );
        }
        Ok(InputIndex { inputs, matches })
    }

    /// True when some live entry of `manifest` is a declared input.
    pub(crate) fn touches(&self, manifest: &ManifestWithEntries) -> bool {
        manifest
            .live_entries()
            .any(|e| self.matches.contains_key(e.data_file.file_path.as_str()))
    }

    /// Count a match for `path`; false when it is not an input.
    pub(crate) fn record(&mut self, path: &str) -> bool {
        match self.matches.get_mut(path) {
            Some(count) => {
                *count += 1;
                true
            }
            None => false,
        }
    }

    /// Every input must have been matched exactly once.
    pub(crate) fn finish(self) -> Result<(), TableError> {
        for input in self.inputs {
            match self.matches.get(input.as_str()).copied().unwrap_or(0) {
                0 => return InputFileNotFoundSnafu { path: input }.fail(),
                1 => {}
                _ => return DuplicateFileSnafu { path: input }.fail(),
            }
        }
        Ok(())
    }
}

/// Outputs must be distinct and not already live in the table.
pub(crate) fn check_outputs(live: &HashSet<&str>, outputs: &[DataFile]) -> Result<(), TableError> {
    let mut seen = HashSet::with_capacity(outputs.len());
    for output in outputs {
        let path = output.file_path.as_str();
        ensure!(
            !live.contains(path) && seen.insert(path),
            DuplicateFileSnafu { path }
        );
    }
    Ok(())
}

/// Plan a merge of `inputs` (absolute URIs) into `outputs` on top of the
/// current `manifests`.
///
/// DELETED entries of touched manifests are dropped.
pub fn plan_merge(
    manifests: &[ManifestWithEntries],
    inputs: &[String],
    outputs: Vec<DataFile>,
    snapshot_id: i64,
) -> Result<MergePlan, TableError> {
    ensure!(
        !inputs.is_empty(),
        EmptyOperationSnafu {
            msg: "merge without input files",
        }
    );
    ensure!(
        !outputs.is_empty(),
        EmptyOperationSnafu {
            msg: "merge without output files",
        }
    );

    let mut index = InputIndex::new(inputs)?;
    let mut live = HashSet::new();
    let mut carried = Vec::new();
    let mut entries = Vec::new();
    let mut delta = SummaryDelta::default();

    for manifest in manifests {
        if !index.touches(manifest) {
            carried.push(manifest.manifest.clone());
            live.extend(manifest.live_entries().map(|e| e.data_file.file_path.as_str()));
            continue;
        }
        for entry in manifest.live_entries() {
            let path = entry.data_file.file_path.as_str();
            if index.record(path) {
                delta.delete(&entry.data_file);
            } else {
                live.insert(path);
                entries.push(entry.to_existing());
            }
        }
    }
    index.finish()?;
    check_outputs(&live, &outputs)?;

    for output in outputs {
        delta.add(&output);
        entries.push(ManifestEntry::added(snapshot_id, output));
    }

    Ok(MergePlan {
        carried,
        entries,
        delta,
    })
}

/// Merge `inputs` (absolute URIs) into the already written `outputs` in a
/// single commit attempt. Snapshot operation `replace`.
pub async fn merge_into_table(
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

    let producer = SnapshotProducer::new(table, Operation::Replace);
    let data_files = outputs.iter().map(|f| f.to_data_file(schema)).collect();
    let plan = plan_merge(&loaded, inputs, data_files, producer.snapshot_id())?;

    let manifest = producer.write_manifest(&plan.entries).await?;
    let mut manifest_list = plan.carried;
    manifest_list.push(manifest);

    producer
        .commit(catalog, &manifest_list, plan.delta, properties)
        .await
}

/// Apply merge groups given relative to `data/`, retrying on commit
/// conflicts.
pub async fn merge_files(
    location: &TableLocation,
    ops: &[MergeOp],
    properties: &HashMap<String, String>,
    config: &OperationConfig,
) -> Result<Table, TableError> {
    ensure!(
        !ops.is_empty(),
        EmptyOperationSnafu {
            msg: "merge without operations",
        }
    );
    for op in ops {
        ensure!(
            !op.inputs.is_empty(),
            EmptyOperationSnafu {
                msg: format!("merge into {} without input files", op.output),
            }
        );
    }

    let inputs: Vec<String> = resolve_data_paths(
        location,
        &ops.iter().flat_map(|op| &op.inputs).collect::<Vec<_>>(),
    )?
    .iter()
    .map(|rel| location.uri_for(rel))
    .collect();
    let output_paths =
        resolve_data_paths(location, &ops.iter().map(|op| &op.output).collect::<Vec<_>>())?;
    let outputs = parquet::read_footers(location, &output_paths, config.io_concurrency)
        .await
        .context(ParquetFooterSnafu)?;

    let catalog = &VersionHintCatalog::new(location.clone());
    let (inputs, outputs) = (inputs.as_slice(), outputs.as_slice());
    let io_concurrency = config.io_concurrency;

    do_commit(&config.retry, move || async move {
        let table = catalog.load_table().await?;
        merge_into_table(catalog, &table, inputs, outputs, properties, io_concurrency).await
    })
    .await
}
