//! Append pipeline.
//!
//! `append_to_table` is one attempt against an already loaded table:
//! - every file must live under `data/` and carry the table schema,
//! - no file may be declared twice or already be live in the table,
//! - one new manifest with an ADDED entry per file is written,
//! - the manifest list is the previous one plus that manifest.
//!
//! `append_files` wraps it with create-on-first-append and commit retries.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use snafu::prelude::*;

use crate::{
    catalog::{CatalogError, VersionHintCatalog, do_commit},
    formats::parquet::{self, ParquetFooter},
    metadata::{ManifestEntry, Operation, Schema},
    storage::TableLocation,
    table::{
        OperationConfig, Table,
        error::{
            DuplicateFileSnafu, EmptyOperationSnafu, FileOutsideTablePrefixSnafu,
            ParquetFooterSnafu, SchemaInferenceSnafu, SchemaMismatchSnafu, TableError,
        },
        manifests,
        snapshot_producer::{SnapshotProducer, SummaryDelta},
    },
};

/// Append already written data files to `table` in a single commit attempt.
///
/// Fails before writing anything when a file lies outside `data/`, has a
/// schema other than the table's, is listed twice, or is already part of the
/// current snapshot.
pub async fn append_to_table(
    catalog: &VersionHintCatalog,
    table: &Table,
    footers: &[ParquetFooter],
    properties: &HashMap<String, String>,
    io_concurrency: usize,
) -> Result<Table, TableError> {
    ensure!(
        !footers.is_empty(),
        EmptyOperationSnafu {
            msg: "append without data files",
        }
    );
    let schema = table.current_schema()?;
    validate_footers(table.location(), schema, footers)?;

    let current = manifests::current_manifests(table).await?;
    let loaded =
        manifests::load_manifests_with_entries(table.location(), current.clone(), io_concurrency)
            .await?;
    let live: HashSet<&str> = loaded
        .iter()
        .flat_map(|m| m.live_entries())
        .map(|e| e.data_file.file_path.as_str())
        .collect();

    let mut seen = HashSet::with_capacity(footers.len());
    for footer in footers {
        let uri = footer.uri.as_str();
        ensure!(
            !live.contains(uri) && seen.insert(uri),
            DuplicateFileSnafu { path: uri }
        );
    }

    let producer = SnapshotProducer::new(table, Operation::Append);
    let mut delta = SummaryDelta::default();
    let entries: Vec<ManifestEntry> = footers
        .iter()
        .map(|footer| {
            let data_file = footer.to_data_file(schema);
            delta.add(&data_file);
            ManifestEntry::added(producer.snapshot_id(), data_file)
        })
        .collect();

    let manifest = producer.write_manifest(&entries).await?;
    let mut manifest_list = current;
    manifest_list.push(manifest);

    producer
        .commit(catalog, &manifest_list, delta, properties)
        .await
}

/// Append files given relative to `data/`, creating the table from their
/// common schema when it does not exist yet. A created table carries
/// `properties` as its table properties; they also go to the snapshot summary.
///
/// Footers are read once; the load / create / append cycle is re-run under
/// [`do_commit`] when it loses a commit race.
pub async fn append_files<S: AsRef<str>>(
    location: &TableLocation,
    rel_paths: &[S],
    properties: &HashMap<String, String>,
    config: &OperationConfig,
) -> Result<Table, TableError> {
    ensure!(
        !rel_paths.is_empty(),
        EmptyOperationSnafu {
            msg: "append without data files",
        }
    );
    let paths = resolve_data_paths(location, rel_paths)?;
    let footers = parquet::read_footers(location, &paths, config.io_concurrency)
        .await
        .context(ParquetFooterSnafu)?;

    let catalog = &VersionHintCatalog::new(location.clone());
    let footers = footers.as_slice();
    let io_concurrency = config.io_concurrency;

    do_commit(&config.retry, move || async move {
        let table = load_or_create(catalog, footers, properties).await?;
        append_to_table(catalog, &table, footers, properties, io_concurrency).await
    })
    .await
}

/// Infer the schema shared by every footer.
///
/// Fails with [`TableError::SchemaMismatch`] naming the first file whose
/// schema differs from the first footer's.
pub fn infer_common_schema(footers: &[ParquetFooter]) -> Result<Schema, TableError> {
    let mut schemas = footers.iter().map(|footer| {
        footer.schema().context(SchemaInferenceSnafu {
            path: footer.rel_path.display().to_string(),
        })
    });
    let Some(first) = schemas.next().transpose()? else {
        return EmptyOperationSnafu {
            msg: "schema inference without data files",
        }
        .fail();
    };

    for (footer, schema) in footers.iter().skip(1).zip(schemas) {
        ensure!(
            schema?.same_fields(&first),
            SchemaMismatchSnafu {
                path: footer.rel_path.display().to_string(),
                reference: footers[0].rel_path.display().to_string(),
            }
        );
    }
    Ok(first)
}

async fn load_or_create(
    catalog: &VersionHintCatalog,
    footers: &[ParquetFooter],
    properties: &HashMap<String, String>,
) -> Result<Table, TableError> {
    match catalog.load_table().await {
        Ok(table) => return Ok(table),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }

    let schema = infer_common_schema(footers)?;
    match catalog.create_table(schema, properties.clone()).await {
        Ok(table) => Ok(table),
        Err(CatalogError::TableAlreadyExists { .. }) => Ok(catalog.load_table().await?),
        Err(e) => Err(e.into()),
    }
}

/// Map caller paths (relative to `data/`) to root-relative paths.
pub(crate) fn resolve_data_paths<S: AsRef<str>>(
    location: &TableLocation,
    rel_paths: &[S],
) -> Result<Vec<PathBuf>, TableError> {
    rel_paths
        .iter()
        .map(|p| {
            let p = p.as_ref();
            location
                .data_file_path(p)
                .context(FileOutsideTablePrefixSnafu {
                    path: p,
                    prefix: location.data_prefix(),
                })
        })
        .collect()
}

/// Every footer lies under `data/` and has exactly `schema`.
pub(crate) fn validate_footers(
    location: &TableLocation,
    schema: &Schema,
    footers: &[ParquetFooter],
) -> Result<(), TableError> {
    for footer in footers {
        ensure!(
            location.is_data_uri(&footer.uri),
            FileOutsideTablePrefixSnafu {
                path: footer.uri.as_str(),
                prefix: location.data_prefix(),
            }
        );
    }
    for footer in footers {
        let path = footer.rel_path.display().to_string();
        let file_schema = footer
            .schema()
            .context(SchemaInferenceSnafu { path: path.as_str() })?;
        ensure!(
            file_schema.same_fields(schema),
            SchemaMismatchSnafu {
                path,
                reference: "the table schema",
            }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::snapshot::summary_keys;
    use crate::test_util::{TestResult, parquet_bytes, put_data_file, put_rows, rows};
    use tempfile::TempDir;

    fn no_props() -> HashMap<String, String> {
        HashMap::new()
    }

    #[tokio::test]
    async fn first_append_creates_table_from_file_schema() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        put_rows(&location, "a.parquet", &rows(0..10)).await?;
        put_rows(&location, "b.parquet", &rows(10..15)).await?;
        let props = HashMap::from([("owner".to_string(), "ingest".to_string())]);

        let table = append_files(
            &location,
            &["a.parquet", "b.parquet"],
            &props,
            &OperationConfig::default(),
        )
        .await?;
        assert_eq!(table.metadata().properties, props);

        let snapshot = table.current_snapshot().ok_or("no snapshot")?;
        assert_eq!(snapshot.sequence_number, 1);
        assert_eq!(snapshot.parent_snapshot_id, None);
        assert_eq!(snapshot.summary.operation, Operation::Append);
        assert_eq!(snapshot.summary.metric(summary_keys::TOTAL_RECORDS), Some(15));

        let schema = table.current_schema()?;
        assert_eq!(schema.fields.len(), 2);
        assert_eq!(schema.fields[0].name, "block");

        let listed = manifests::current_manifests(&table).await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].added_files_count, 2);
        Ok(())
    }

    #[tokio::test]
    async fn appends_chain_sequence_numbers_and_parents() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        let config = OperationConfig::default();
        put_rows(&location, "a.parquet", &rows(0..3)).await?;
        put_rows(&location, "b.parquet", &rows(3..6)).await?;

        let first = append_files(&location, &["a.parquet"], &no_props(), &config).await?;
        let second = append_files(&location, &["b.parquet"], &no_props(), &config).await?;

        let first_snap = first.current_snapshot().ok_or("no snapshot")?;
        let second_snap = second.current_snapshot().ok_or("no snapshot")?;
        assert_eq!(second_snap.sequence_number, 2);
        assert_eq!(second_snap.parent_snapshot_id, Some(first_snap.snapshot_id));
        assert!(second_snap.snapshot_id > first_snap.snapshot_id);
        assert_eq!(
            second_snap.summary.metric(summary_keys::TOTAL_DATA_FILES),
            Some(2)
        );

        let listed = manifests::current_manifests(&second).await?;
        assert_eq!(listed.len(), 2);
        assert_eq!(second.metadata().metadata_log.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn path_outside_data_is_rejected_before_any_write() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());

        let err = append_files(
            &location,
            &["../escape.parquet"],
            &no_props(),
            &OperationConfig::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TableError::FileOutsideTablePrefix { .. }));
        let catalog = VersionHintCatalog::new(location);
        assert!(catalog.load_table().await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_bootstrap_schemas_create_no_table() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        put_rows(&location, "a.parquet", &rows(0..3)).await?;
        put_data_file(&location, "b.parquet", &parquet_bytes(&rows(3..6), true)?).await?;

        let err = append_files(
            &location,
            &["a.parquet", "b.parquet"],
            &no_props(),
            &OperationConfig::default(),
        )
        .await
        .unwrap_err();

        match err {
            TableError::SchemaMismatch { path, .. } => assert!(path.ends_with("b.parquet")),
            other => return Err(format!("unexpected error: {other}").into()),
        }
        let catalog = VersionHintCatalog::new(location);
        assert!(catalog.load_table().await.unwrap_err().is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn file_with_other_schema_is_rejected_on_existing_table() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        let config = OperationConfig::default();
        put_rows(&location, "a.parquet", &rows(0..3)).await?;
        put_data_file(&location, "b.parquet", &parquet_bytes(&rows(3..6), true)?).await?;

        let table = append_files(&location, &["a.parquet"], &no_props(), &config).await?;
        let err = append_files(&location, &["b.parquet"], &no_props(), &config)
            .await
            .unwrap_err();

        assert!(matches!(err, TableError::SchemaMismatch { .. }));
        let reloaded = VersionHintCatalog::new(location).load_table().await?;
        assert_eq!(reloaded.metadata_file_name(), table.metadata_file_name());
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_files_are_rejected() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        let config = OperationConfig::default();
        put_rows(&location, "a.parquet", &rows(0..3)).await?;

        let err = append_files(&location, &["a.parquet", "a.parquet"], &no_props(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, TableError::DuplicateFile { .. }));

        append_files(&location, &["a.parquet"], &no_props(), &config).await?;
        let err = append_files(&location, &["a.parquet"], &no_props(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, TableError::DuplicateFile { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn stale_table_loses_commit_race() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        let config = OperationConfig::default();
        put_rows(&location, "a.parquet", &rows(0..3)).await?;
        put_rows(&location, "b.parquet", &rows(3..6)).await?;
        put_rows(&location, "c.parquet", &rows(6..9)).await?;
        append_files(&location, &["a.parquet"], &no_props(), &config).await?;

        let catalog = VersionHintCatalog::new(location.clone());
        let stale = catalog.load_table().await?;
        append_files(&location, &["b.parquet"], &no_props(), &config).await?;

        let paths = resolve_data_paths(&location, &["c.parquet"])?;
        let footers = parquet::read_footers(&location, &paths, 1).await?;
        let err = append_to_table(&catalog, &stale, &footers, &no_props(), 1)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        Ok(())
    }

    #[tokio::test]
    async fn empty_append_is_rejected() -> TestResult {
        let tmp = TempDir::new()?;
        let location = TableLocation::local(tmp.path());
        let none: [&str; 0] = [];

        let err = append_files(&location, &none, &no_props(), &OperationConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TableError::EmptyOperation { .. }));
        Ok(())
    }
}
