//! Parquet footer access.
//!
//! Only the footer of a data file is ever read: the trailing 8 bytes give the
//! metadata length and magic, then a single range request fetches the
//! Thrift-encoded metadata. From it we derive the table schema
//! ([`schema::infer_schema`]), the row count and per-column bounds.

pub mod schema;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::{StreamExt, TryStreamExt, stream};
use log::debug;
use parquet::errors::ParquetError;
use parquet::file::metadata::{ParquetMetaData, ParquetMetaDataReader};
use parquet::file::statistics::Statistics;
use snafu::prelude::*;

pub use schema::{SchemaInferenceError, infer_schema};

use crate::metadata::{DataContentType, DataFile, DataFileFormat, Schema};
use crate::storage::{self, StorageError, TableLocation};

const PARQUET_MAGIC: &[u8; 4] = b"PAR1";
const FOOTER_TAIL_LEN: u64 = 8;
/// Leading magic + metadata length + trailing magic.
const MIN_FILE_LEN: u64 = 12;

/// Errors raised while fetching or decoding a Parquet footer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ParquetFooterError {
    /// The file could not be probed or read.
    #[snafu(display("Failed to read Parquet file {path}: {source}"))]
    Storage {
        /// Root-relative path.
        path: String,
        /// Underlying storage error.
        #[snafu(source(from(StorageError, Box::new)))]
        source: Box<StorageError>,
    },

    /// The file is smaller than an empty Parquet file.
    #[snafu(display("File {path} is too short to be Parquet ({size} bytes)"))]
    TooShort {
        /// Root-relative path.
        path: String,
        /// Observed size.
        size: u64,
    },

    /// The trailing magic is not `PAR1`.
    #[snafu(display("File {path} does not end with the Parquet magic"))]
    BadMagic {
        /// Root-relative path.
        path: String,
    },

    /// The footer length points outside the file.
    #[snafu(display("File {path} declares a {len}-byte footer but is only {size} bytes"))]
    FooterLength {
        /// Root-relative path.
        path: String,
        /// Declared metadata length.
        len: u64,
        /// Observed size.
        size: u64,
    },

    /// The Thrift metadata could not be decoded.
    #[snafu(display("Failed to decode Parquet footer of {path}: {source}"))]
    Decode {
        /// Root-relative path.
        path: String,
        /// Underlying Parquet error.
        source: ParquetError,
    },
}

impl ParquetFooterError {
    /// True when the file itself does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ParquetFooterError::Storage { source, .. } if source.is_not_found())
    }
}

/// Decoded footer of one data file.
#[derive(Debug, Clone)]
pub struct ParquetFooter {
    /// Absolute URI recorded in manifests.
    pub uri: String,
    /// Path relative to the table root.
    pub rel_path: PathBuf,
    /// Size of the whole file in bytes.
    pub file_size: u64,
    /// Decoded file metadata.
    pub metadata: ParquetMetaData,
}

impl ParquetFooter {
    /// Infer the table schema this file would produce.
    pub fn schema(&self) -> Result<Schema, SchemaInferenceError> {
        infer_schema(self.metadata.file_metadata().schema())
    }

    /// Number of rows in the file.
    pub fn record_count(&self) -> i64 {
        self.metadata.file_metadata().num_rows()
    }

    /// Build the manifest descriptor for this file, with per-field bounds
    /// resolved against `schema`.
    pub fn to_data_file(&self, schema: &Schema) -> DataFile {
        let (lower_bounds, upper_bounds) = column_bounds(&self.metadata, schema);
        DataFile {
            content: DataContentType::Data,
            file_path: self.uri.clone(),
            file_format: DataFileFormat::Parquet,
            record_count: self.record_count(),
            file_size_in_bytes: i64::try_from(self.file_size).unwrap_or(i64::MAX),
            lower_bounds,
            upper_bounds,
        }
    }
}

/// Fetch and decode the footer of the file at `rel_path`.
pub async fn read_footer(
    location: &TableLocation,
    rel_path: &Path,
) -> Result<ParquetFooter, ParquetFooterError> {
    let path = rel_path.display().to_string();
    let store = location.storage();

    let size = storage::head(store, rel_path)
        .await
        .context(StorageSnafu { path: path.clone() })?
        .size;
    ensure!(size >= MIN_FILE_LEN, TooShortSnafu { path, size });

    let tail = storage::read_range(store, rel_path, size - FOOTER_TAIL_LEN..size)
        .await
        .context(StorageSnafu { path: path.clone() })?;
    ensure!(&tail[4..] == PARQUET_MAGIC, BadMagicSnafu { path });

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&tail[..4]);
    let len = u64::from(u32::from_le_bytes(len_bytes));
    ensure!(
        len + MIN_FILE_LEN <= size,
        FooterLengthSnafu { path, len, size }
    );

    let end = size - FOOTER_TAIL_LEN;
    let buf = storage::read_range(store, rel_path, end - len..end)
        .await
        .context(StorageSnafu { path: path.clone() })?;
    let metadata = ParquetMetaDataReader::decode_metadata(&buf)
        .context(DecodeSnafu { path: path.clone() })?;

    debug!(
        "read Parquet footer of {path}: {} rows in {} row groups",
        metadata.file_metadata().num_rows(),
        metadata.num_row_groups()
    );

    Ok(ParquetFooter {
        uri: location.uri_for(rel_path),
        rel_path: rel_path.to_path_buf(),
        file_size: size,
        metadata,
    })
}

/// Fetch several footers with at most `concurrency` requests in flight.
/// Results keep the order of `rel_paths`.
pub async fn read_footers(
    location: &TableLocation,
    rel_paths: &[PathBuf],
    concurrency: usize,
) -> Result<Vec<ParquetFooter>, ParquetFooterError> {
    stream::iter(rel_paths.iter().cloned())
        .map(|rel| async move { read_footer(location, &rel).await })
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}

type Bounds = BTreeMap<i32, Vec<u8>>;

/// Lower/upper bounds for every primitive column reachable through structs.
///
/// A column is skipped when any row group lacks statistics, when no row group
/// has a min/max, or when a float bound is NaN.
fn column_bounds(metadata: &ParquetMetaData, schema: &Schema) -> (Bounds, Bounds) {
    let mut lower = Bounds::new();
    let mut upper = Bounds::new();
    let descr = metadata.file_metadata().schema_descr();

    for (idx, column) in descr.columns().iter().enumerate() {
        let Some(field) = schema.field_for_column_path(column.path().parts()) else {
            continue;
        };
        let stats: Option<Vec<&Statistics>> = metadata
            .row_groups()
            .iter()
            .map(|rg| rg.column(idx).statistics())
            .collect();
        let Some((lo, hi)) = stats.and_then(|s| merge_statistics(&s)) else {
            continue;
        };
        lower.insert(field.id, lo);
        upper.insert(field.id, hi);
    }

    (lower, upper)
}

/// Merge per-row-group statistics into single-value encoded bounds.
fn merge_statistics(stats: &[&Statistics]) -> Option<(Vec<u8>, Vec<u8>)> {
    match stats.first()? {
        Statistics::Boolean(_) => fold(stats, |s| match s {
            Statistics::Boolean(v) => Some((v.min_opt().copied(), v.max_opt().copied())),
            _ => None,
        })
        .map(|(lo, hi)| (vec![u8::from(lo)], vec![u8::from(hi)])),
        Statistics::Int32(_) => fold(stats, |s| match s {
            Statistics::Int32(v) => Some((v.min_opt().copied(), v.max_opt().copied())),
            _ => None,
        })
        .map(|(lo, hi)| (lo.to_le_bytes().to_vec(), hi.to_le_bytes().to_vec())),
        Statistics::Int64(_) => fold(stats, |s| match s {
            Statistics::Int64(v) => Some((v.min_opt().copied(), v.max_opt().copied())),
            _ => None,
        })
        .map(|(lo, hi)| (lo.to_le_bytes().to_vec(), hi.to_le_bytes().to_vec())),
        Statistics::Float(_) => fold(stats, |s| match s {
            Statistics::Float(v) => {
                let (lo, hi) = (v.min_opt().copied(), v.max_opt().copied());
                let nan = lo.is_some_and(f32::is_nan) || hi.is_some_and(f32::is_nan);
                (!nan).then_some((lo, hi))
            }
            _ => None,
        })
        .map(|(lo, hi)| (lo.to_le_bytes().to_vec(), hi.to_le_bytes().to_vec())),
        Statistics::Double(_) => fold(stats, |s| match s {
            Statistics::Double(v) => {
                let (lo, hi) = (v.min_opt().copied(), v.max_opt().copied());
                let nan = lo.is_some_and(f64::is_nan) || hi.is_some_and(f64::is_nan);
                (!nan).then_some((lo, hi))
            }
            _ => None,
        })
        .map(|(lo, hi)| (lo.to_le_bytes().to_vec(), hi.to_le_bytes().to_vec())),
        Statistics::ByteArray(_) => fold(stats, |s| match s {
            Statistics::ByteArray(v) => Some((
                v.min_opt().map(|b| b.data().to_vec()),
                v.max_opt().map(|b| b.data().to_vec()),
            )),
            _ => None,
        }),
        Statistics::FixedLenByteArray(_) => fold(stats, |s| match s {
            Statistics::FixedLenByteArray(v) => Some((
                v.min_opt().map(|b| b.data().to_vec()),
                v.max_opt().map(|b| b.data().to_vec()),
            )),
            _ => None,
        }),
        Statistics::Int96(_) => None,
    }
}

/// Fold row-group min/max pairs. `pick` returning `None` aborts the column;
/// row groups without a min or max (all nulls) are skipped.
fn fold<T: PartialOrd>(
    stats: &[&Statistics],
    pick: impl Fn(&Statistics) -> Option<(Option<T>, Option<T>)>,
) -> Option<(T, T)> {
    let mut acc: Option<(T, T)> = None;
    for s in stats {
        let (Some(lo), Some(hi)) = pick(s)? else {
            continue;
        };
        acc = Some(match acc {
            None => (lo, hi),
            Some((cur_lo, cur_hi)) => (
                if lo < cur_lo { lo } else { cur_lo },
                if hi > cur_hi { hi } else { cur_hi },
            ),
        });
    }
    acc
}
