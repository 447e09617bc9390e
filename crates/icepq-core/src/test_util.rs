use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use parquet::basic::{LogicalType, Repetition, Type as PhysicalType};
use parquet::column::writer::ColumnWriter;
use parquet::data_type::ByteArray;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::parser::parse_message_type;
use parquet::schema::types::Type;

use crate::storage::{self, TableLocation};

pub(crate) type TestResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Clone, Copy, Debug)]
pub(crate) struct TestRow {
    pub(crate) block: i64,
    pub(crate) hash: &'static str,
}

pub(crate) fn rows(blocks: Range<i64>) -> Vec<TestRow> {
    blocks.map(|block| TestRow { block, hash: "0xabc" }).collect()
}

/// Parquet bytes with `required int64 block; optional binary hash (STRING)`.
///
/// With `block_as_int32` the first column is written as INT32 instead, which
/// yields a structurally different schema.
pub(crate) fn parquet_bytes(
    rows: &[TestRow],
    block_as_int32: bool,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let block_type = if block_as_int32 {
        PhysicalType::INT32
    } else {
        PhysicalType::INT64
    };
    let block = Type::primitive_type_builder("block", block_type)
        .with_repetition(Repetition::REQUIRED)
        .build()?;
    let hash = Type::primitive_type_builder("hash", PhysicalType::BYTE_ARRAY)
        .with_repetition(Repetition::OPTIONAL)
        .with_logical_type(Some(LogicalType::String))
        .build()?;
    let schema = Arc::new(
        Type::group_type_builder("schema")
            .with_fields(vec![Arc::new(block), Arc::new(hash)])
            .build()?,
    );

    let blocks_i64: Vec<i64> = rows.iter().map(|r| r.block).collect();
    let blocks_i32: Vec<i32> = rows.iter().map(|r| r.block as i32).collect();
    let hashes: Vec<ByteArray> = rows
        .iter()
        .map(|r| ByteArray::from(r.hash.as_bytes()))
        .collect();
    let hash_defs = vec![1i16; rows.len()];

    let mut buf = Vec::new();
    let props = WriterProperties::builder().build();
    let mut writer = SerializedFileWriter::new(&mut buf, schema, Arc::new(props))?;

    let mut row_group_writer = writer.next_row_group()?;
    while let Some(mut col_writer) = row_group_writer.next_column()? {
        match col_writer.untyped() {
            ColumnWriter::Int64ColumnWriter(w) => {
                w.write_batch(&blocks_i64, None, None)?;
            }
            ColumnWriter::Int32ColumnWriter(w) => {
                w.write_batch(&blocks_i32, None, None)?;
            }
            ColumnWriter::ByteArrayColumnWriter(w) => {
                w.write_batch(&hashes, Some(&hash_defs), None)?;
            }
            _ => return Err("unexpected column writer type".into()),
        }
        col_writer.close()?;
    }
    row_group_writer.close()?;
    writer.close()?;

    Ok(buf)
}

/// Parquet bytes for an arbitrary message type with no row groups.
pub(crate) fn empty_parquet_bytes(message: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let schema = Arc::new(parse_message_type(message)?);
    let mut buf = Vec::new();
    let writer = SerializedFileWriter::new(
        &mut buf,
        schema,
        Arc::new(WriterProperties::builder().build()),
    )?;
    writer.close()?;
    Ok(buf)
}

/// Store `bytes` as `data/<name>` and return the root-relative path.
pub(crate) async fn put_data_file(
    location: &TableLocation,
    name: &str,
    bytes: &[u8],
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let rel = location
        .data_file_path(name)
        .ok_or("invalid data file name")?;
    storage::write_new(location.storage(), &rel, bytes).await?;
    Ok(rel)
}

/// Write a standard fixture file with `rows` under `data/<name>`.
pub(crate) async fn put_rows(
    location: &TableLocation,
    name: &str,
    rows: &[TestRow],
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let bytes = parquet_bytes(rows, false)?;
    put_data_file(location, name, &bytes).await
}
