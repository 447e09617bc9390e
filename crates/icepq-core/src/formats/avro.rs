//! Avro codec for manifests and manifest lists.
//!
//! Both files are Avro object container files whose record schemas carry
//! Iceberg `field-id` attributes. Records are built and read as
//! [`apache_avro::types::Value`] trees so optional fields and the map-as-array
//! encoding of bounds stay explicit.
//!
//! Readers look fields up by name and ignore fields they do not know, so
//! manifests written by other Iceberg implementations (which carry more
//! columns) decode fine.

use std::collections::BTreeMap;

use apache_avro::{Reader, Schema as AvroSchema, Writer, types::Value};
use serde_json::json;
use snafu::{Backtrace, prelude::*};

use crate::metadata::{
    DataContentType, DataFile, DataFileFormat, ManifestContent, ManifestEntry, ManifestFile,
    ManifestStatus, Schema,
};

/// Errors raised while encoding or decoding manifest files.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ManifestError {
    /// The Avro library rejected a schema, record or container.
    #[snafu(display("Avro error while {action}: {source}"))]
    Avro {
        /// What the codec was doing.
        action: String,
        /// Underlying Avro error.
        source: apache_avro::Error,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// The table schema could not be serialized into manifest metadata.
    #[snafu(display("Failed to serialize table schema for manifest metadata: {source}"))]
    SchemaJson {
        /// Underlying JSON error.
        source: serde_json::Error,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// A record was missing a field or carried a value of the wrong shape.
    #[snafu(display("Malformed {record} record: {msg}"))]
    Malformed {
        /// Record kind (`manifest_entry`, `manifest_file`, ...).
        record: String,
        /// What was wrong.
        msg: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },
}

type ManifestResult<T> = Result<T, ManifestError>;

const FORMAT_VERSION: &str = "2";

fn manifest_entry_schema() -> ManifestResult<AvroSchema> {
    let bounds = |name: &str, key_id: i32, value_id: i32| {
        json!(["null", {
            "type": "array",
            "logicalType": "map",
            "items": {
                "type": "record",
                "name": name,
                "fields": [
                    {"name": "key", "type": "int", "field-id": key_id},
                    {"name": "value", "type": "bytes", "field-id": value_id}
                ]
            }
        }])
    };

    let schema = json!({
        "type": "record",
        "name": "manifest_entry",
        "fields": [
            {"name": "status", "type": "int", "field-id": 0},
            {"name": "snapshot_id", "type": ["null", "long"], "default": null, "field-id": 1},
            {"name": "sequence_number", "type": ["null", "long"], "default": null, "field-id": 3},
            {"name": "file_sequence_number", "type": ["null", "long"], "default": null, "field-id": 4},
            {"name": "data_file", "field-id": 2, "type": {
                "type": "record",
                "name": "r2",
                "fields": [
                    {"name": "content", "type": "int", "field-id": 134},
                    {"name": "file_path", "type": "string", "field-id": 100},
                    {"name": "file_format", "type": "string", "field-id": 101},
                    {"name": "partition", "field-id": 102, "type": {
                        "type": "record", "name": "r102", "fields": []
                    }},
                    {"name": "record_count", "type": "long", "field-id": 103},
                    {"name": "file_size_in_bytes", "type": "long", "field-id": 104},
                    {"name": "lower_bounds", "type": bounds("k126_v127", 126, 127), "default": null, "field-id": 125},
                    {"name": "upper_bounds", "type": bounds("k129_v130", 129, 130), "default": null, "field-id": 128}
                ]
            }}
        ]
    });

    AvroSchema::parse(&schema).context(AvroSnafu {
        action: "parsing the manifest entry schema",
    })
}

fn manifest_file_schema() -> ManifestResult<AvroSchema> {
    let schema = json!({
        "type": "record",
        "name": "manifest_file",
        "fields": [
            {"name": "manifest_path", "type": "string", "field-id": 500},
            {"name": "manifest_length", "type": "long", "field-id": 501},
            {"name": "partition_spec_id", "type": "int", "field-id": 502},
            {"name": "content", "type": "int", "field-id": 517},
            {"name": "sequence_number", "type": "long", "field-id": 515},
            {"name": "min_sequence_number", "type": "long", "field-id": 516},
            {"name": "added_snapshot_id", "type": "long", "field-id": 503},
            {"name": "added_files_count", "type": "int", "field-id": 504},
            {"name": "existing_files_count", "type": "int", "field-id": 505},
            {"name": "deleted_files_count", "type": "int", "field-id": 506},
            {"name": "added_rows_count", "type": "long", "field-id": 512},
            {"name": "existing_rows_count", "type": "long", "field-id": 513},
            {"name": "deleted_rows_count", "type": "long", "field-id": 514},
            {"name": "partitions", "default": null, "field-id": 507, "type": ["null", {
                "type": "array",
                "element-id": 508,
                "items": {
                    "type": "record",
                    "name": "r508",
                    "fields": [
                        {"name": "contains_null", "type": "boolean", "field-id": 509},
                        {"name": "contains_nan", "type": ["null", "boolean"], "default": null, "field-id": 518},
                        {"name": "lower_bound", "type": ["null", "bytes"], "default": null, "field-id": 510},
                        {"name": "upper_bound", "type": ["null", "bytes"], "default": null, "field-id": 511}
                    ]
                }
            }]},
            {"name": "key_metadata", "type": ["null", "bytes"], "default": null, "field-id": 519}
        ]
    });

    AvroSchema::parse(&schema).context(AvroSnafu {
        action: "parsing the manifest list schema",
    })
}

/// Values written into a manifest's Avro user metadata.
#[derive(Debug, Clone)]
pub struct ManifestMetadata<'a> {
    /// Table schema the manifest's files were validated against.
    pub schema: &'a Schema,
    /// Data or delete manifest.
    pub content: ManifestContent,
}

/// Values written into a manifest list's Avro user metadata.
#[derive(Debug, Clone, Copy)]
pub struct ManifestListMetadata {
    /// Snapshot the list belongs to.
    pub snapshot_id: i64,
    /// Parent of that snapshot.
    pub parent_snapshot_id: Option<i64>,
    /// Sequence number of that snapshot.
    pub sequence_number: i64,
}

// ====================
// Value construction
// ====================

fn null() -> Value {
    Value::Union(0, Box::new(Value::Null))
}

fn some(value: Value) -> Value {
    Value::Union(1, Box::new(value))
}

fn opt_long(value: Option<i64>) -> Value {
    value.map_or_else(null, |v| some(Value::Long(v)))
}

fn bounds_value(bounds: &BTreeMap<i32, Vec<u8>>) -> Value {
    if bounds.is_empty() {
        return null();
    }
    some(Value::Array(
        bounds
            .iter()
            .map(|(key, value)| {
                Value::Record(vec![
                    ("key".to_string(), Value::Int(*key)),
                    ("value".to_string(), Value::Bytes(value.clone())),
                ])
            })
            .collect(),
    ))
}

fn entry_value(entry: &ManifestEntry) -> Value {
    let df = &entry.data_file;
    let data_file = Value::Record(vec![
        ("content".to_string(), Value::Int(df.content.code())),
        ("file_path".to_string(), Value::String(df.file_path.clone())),
        (
            "file_format".to_string(),
            Value::String(df.file_format.as_str().to_string()),
        ),
        ("partition".to_string(), Value::Record(Vec::new())),
        ("record_count".to_string(), Value::Long(df.record_count)),
        (
            "file_size_in_bytes".to_string(),
            Value::Long(df.file_size_in_bytes),
        ),
        ("lower_bounds".to_string(), bounds_value(&df.lower_bounds)),
        ("upper_bounds".to_string(), bounds_value(&df.upper_bounds)),
    ]);

    Value::Record(vec![
        ("status".to_string(), Value::Int(entry.status.code())),
        ("snapshot_id".to_string(), opt_long(entry.snapshot_id)),
        ("sequence_number".to_string(), opt_long(entry.sequence_number)),
        (
            "file_sequence_number".to_string(),
            opt_long(entry.file_sequence_number),
        ),
        ("data_file".to_string(), data_file),
    ])
}

fn manifest_file_value(manifest: &ManifestFile) -> Value {
    Value::Record(vec![
        (
            "manifest_path".to_string(),
            Value::String(manifest.manifest_path.clone()),
        ),
        (
            "manifest_length".to_string(),
            Value::Long(manifest.manifest_length),
        ),
        (
            "partition_spec_id".to_string(),
            Value::Int(manifest.partition_spec_id),
        ),
        ("content".to_string(), Value::Int(manifest.content.code())),
        (
            "sequence_number".to_string(),
            Value::Long(manifest.sequence_number),
        ),
        (
            "min_sequence_number".to_string(),
            Value::Long(manifest.min_sequence_number),
        ),
        (
            "added_snapshot_id".to_string(),
            Value::Long(manifest.added_snapshot_id),
        ),
        (
            "added_files_count".to_string(),
            Value::Int(manifest.added_files_count),
        ),
        (
            "existing_files_count".to_string(),
            Value::Int(manifest.existing_files_count),
        ),
        (
            "deleted_files_count".to_string(),
            Value::Int(manifest.deleted_files_count),
        ),
        (
            "added_rows_count".to_string(),
            Value::Long(manifest.added_rows_count),
        ),
        (
            "existing_rows_count".to_string(),
            Value::Long(manifest.existing_rows_count),
        ),
        (
            "deleted_rows_count".to_string(),
            Value::Long(manifest.deleted_rows_count),
        ),
        ("partitions".to_string(), null()),
        ("key_metadata".to_string(), null()),
    ])
}

// ====================
// Value access
// ====================

struct Record<'a> {
    kind: &'static str,
    fields: &'a [(String, Value)],
}

impl<'a> Record<'a> {
    fn from_value(kind: &'static str, value: &'a Value) -> ManifestResult<Self> {
        match unwrap_union(value) {
            Value::Record(fields) => Ok(Record { kind, fields }),
            other => MalformedSnafu {
                record: kind,
                msg: format!("expected a record, found {other:?}"),
            }
            .fail(),
        }
    }

    /// Field value with any union wrapper removed; `None` when absent or null.
    fn get(&self, name: &str) -> Option<&'a Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| unwrap_union(v))
            .filter(|v| !matches!(v, Value::Null))
    }

    fn malformed<T>(&self, msg: String) -> ManifestResult<T> {
        MalformedSnafu {
            record: self.kind,
            msg,
        }
        .fail()
    }

    fn required(&self, name: &str) -> ManifestResult<&'a Value> {
        match self.get(name) {
            Some(v) => Ok(v),
            None => self.malformed(format!("missing field {name:?}")),
        }
    }

    fn int(&self, name: &str) -> ManifestResult<i32> {
        match self.required(name)? {
            Value::Int(v) => Ok(*v),
            other => self.malformed(format!("field {name:?} is not an int: {other:?}")),
        }
    }

    fn opt_int(&self, name: &str, default: i32) -> ManifestResult<i32> {
        match self.get(name) {
            None => Ok(default),
            Some(_) => self.int(name),
        }
    }

    fn long(&self, name: &str) -> ManifestResult<i64> {
        match self.required(name)? {
            Value::Long(v) => Ok(*v),
            Value::Int(v) => Ok(i64::from(*v)),
            other => self.malformed(format!("field {name:?} is not a long: {other:?}")),
        }
    }

    fn opt_long(&self, name: &str) -> ManifestResult<Option<i64>> {
        match self.get(name) {
            None => Ok(None),
            Some(_) => self.long(name).map(Some),
        }
    }

    fn string(&self, name: &str) -> ManifestResult<&'a str> {
        match self.required(name)? {
            Value::String(v) => Ok(v),
            other => self.malformed(format!("field {name:?} is not a string: {other:?}")),
        }
    }

    fn bounds(&self, name: &str) -> ManifestResult<BTreeMap<i32, Vec<u8>>> {
        let items = match self.get(name) {
            None => return Ok(BTreeMap::new()),
            Some(Value::Array(items)) => items,
            Some(Value::Map(_)) => {
                return self.malformed(format!("field {name:?} uses a string-keyed map"));
            }
            Some(other) => {
                return self.malformed(format!("field {name:?} is not an array: {other:?}"));
            }
        };

        let mut out = BTreeMap::new();
        for item in items {
            let kv = Record::from_value(self.kind, item)?;
            let key = kv.int("key")?;
            let value = match kv.required("value")? {
                Value::Bytes(b) | Value::Fixed(_, b) => b.clone(),
                other => {
                    return self.malformed(format!("bound for field {key} is not bytes: {other:?}"));
                }
            };
            out.insert(key, value);
        }
        Ok(out)
    }
}

fn unwrap_union(value: &Value) -> &Value {
    match value {
        Value::Union(_, inner) => inner,
        other => other,
    }
}

fn decode_entry(value: &Value) -> ManifestResult<ManifestEntry> {
    let entry = Record::from_value("manifest_entry", value)?;
    let status_code = entry.int("status")?;
    let status = match ManifestStatus::from_code(status_code) {
        Some(s) => s,
        None => return entry.malformed(format!("unknown status {status_code}")),
    };

    let df = Record::from_value("data_file", entry.required("data_file")?)?;
    let content_code = df.opt_int("content", 0)?;
    let content = match DataContentType::from_code(content_code) {
        Some(c) => c,
        None => return df.malformed(format!("unknown content {content_code}")),
    };

    Ok(ManifestEntry {
        status,
        snapshot_id: entry.opt_long("snapshot_id")?,
        sequence_number: entry.opt_long("sequence_number")?,
        file_sequence_number: entry.opt_long("file_sequence_number")?,
        data_file: DataFile {
            content,
            file_path: df.string("file_path")?.to_string(),
            file_format: DataFileFormat::parse(df.string("file_format")?),
            record_count: df.long("record_count")?,
            file_size_in_bytes: df.long("file_size_in_bytes")?,
            lower_bounds: df.bounds("lower_bounds")?,
            upper_bounds: df.bounds("upper_bounds")?,
        },
    })
}

fn decode_manifest_file(value: &Value) -> ManifestResult<ManifestFile> {
    let r = Record::from_value("manifest_file", value)?;
    let content_code = r.opt_int("content", 0)?;
    let content = match ManifestContent::from_code(content_code) {
        Some(c) => c,
        None => return r.malformed(format!("unknown content {content_code}")),
    };
    let sequence_number = r.opt_long("sequence_number")?.unwrap_or(0);

    Ok(ManifestFile {
        manifest_path: r.string("manifest_path")?.to_string(),
        manifest_length: r.long("manifest_length")?,
        partition_spec_id: r.int("partition_spec_id")?,
        content,
        sequence_number,
        min_sequence_number: r
            .opt_long("min_sequence_number")?
            .unwrap_or(sequence_number),
        added_snapshot_id: r.long("added_snapshot_id")?,
        added_files_count: r.opt_int("added_files_count", 0)?,
        existing_files_count: r.opt_int("existing_files_count", 0)?,
        deleted_files_count: r.opt_int("deleted_files_count", 0)?,
        added_rows_count: r.opt_long("added_rows_count")?.unwrap_or(0),
        existing_rows_count: r.opt_long("existing_rows_count")?.unwrap_or(0),
        deleted_rows_count: r.opt_long("deleted_rows_count")?.unwrap_or(0),
    })
}

// ====================
// Public codec
// ====================

fn write_container(
    schema: &AvroSchema,
    user_metadata: Vec<(&str, String)>,
    records: impl IntoIterator<Item = Value>,
) -> ManifestResult<Vec<u8>> {
    let mut writer = Writer::new(schema, Vec::new());
    for (key, value) in user_metadata {
        writer
            .add_user_metadata(key.to_string(), value)
            .context(AvroSnafu {
                action: format!("adding user metadata {key:?}"),
            })?;
    }
    for record in records {
        writer.append(record).context(AvroSnafu {
            action: "appending a record",
        })?;
    }
    writer.into_inner().context(AvroSnafu {
        action: "flushing the container",
    })
}

/// Encode manifest entries into an Avro manifest file.
pub fn encode_manifest(
    entries: &[ManifestEntry],
    metadata: &ManifestMetadata<'_>,
) -> ManifestResult<Vec<u8>> {
    let schema = manifest_entry_schema()?;
    let schema_json = serde_json::to_string(metadata.schema).context(SchemaJsonSnafu)?;

    write_container(
        &schema,
        vec![
            ("schema", schema_json),
            ("schema-id", metadata.schema.schema_id.to_string()),
            ("partition-spec", "[]".to_string()),
            ("partition-spec-id", "0".to_string()),
            ("format-version", FORMAT_VERSION.to_string()),
            ("content", metadata.content.as_str().to_string()),
        ],
        entries.iter().map(entry_value),
    )
}

/// Decode every entry of an Avro manifest file, in file order.
///
/// Inheritable fields are returned as stored; see
/// [`ManifestEntry::inherit_from`].
pub fn decode_manifest(bytes: &[u8]) -> ManifestResult<Vec<ManifestEntry>> {
    let reader = Reader::new(bytes).context(AvroSnafu {
        action: "opening a manifest",
    })?;
    reader
        .map(|value| {
            let value = value.context(AvroSnafu {
                action: "reading a manifest entry",
            })?;
            decode_entry(&value)
        })
        .collect()
}

/// Encode a manifest list.
pub fn encode_manifest_list(
    manifests: &[ManifestFile],
    metadata: ManifestListMetadata,
) -> ManifestResult<Vec<u8>> {
    let schema = manifest_file_schema()?;
    let parent = metadata
        .parent_snapshot_id
        .map_or_else(|| "null".to_string(), |id| id.to_string());

    write_container(
        &schema,
        vec![
            ("snapshot-id", metadata.snapshot_id.to_string()),
            ("parent-snapshot-id", parent),
            ("sequence-number", metadata.sequence_number.to_string()),
            ("format-version", FORMAT_VERSION.to_string()),
        ],
        manifests.iter().map(manifest_file_value),
    )
}

/// Decode a manifest list, in file order.
pub fn decode_manifest_list(bytes: &[u8]) -> ManifestResult<Vec<ManifestFile>> {
    let reader = Reader::new(bytes).context(AvroSnafu {
        action: "opening a manifest list",
    })?;
    reader
        .map(|value| {
            let value = value.context(AvroSnafu {
                action: "reading a manifest list entry",
            })?;
            decode_manifest_file(&value)
        })
        .collect()
}
