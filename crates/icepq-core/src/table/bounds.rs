//! Per-file lower/upper bound values of one field, read from the current
//! snapshot's manifests.

use serde::Serialize;
use snafu::prelude::*;

use crate::{
    catalog::VersionHintCatalog,
    metadata::{DataContentType, ManifestEntry, NestedField, PrimitiveType, Type},
    storage::TableLocation,
    table::{
        error::{
            DeleteFilesPresentSnafu, FieldNotFoundSnafu, MalformedBoundSnafu,
            MissingBoundValueSnafu, TableError, UnsupportedTypeSnafu,
        },
        manifests::{self, ManifestWithEntries},
    },
};

/// Failure policy of [`field_bound_values`]. Both checks are off by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldBoundValuesConfig {
    /// Fail when the snapshot references a delete file.
    pub fail_on_delete_files: bool,
    /// Fail when a file has no lower or upper bound for the field.
    pub fail_on_missing_values: bool,
}

/// A decoded bound.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BoundValue {
    /// `boolean`
    Boolean(bool),
    /// `int`
    Int(i32),
    /// `long`
    Long(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// `string`
    String(String),
}

/// Bounds of one field in one data file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldBoundValues {
    /// Field name as stored in the schema.
    pub field_name: String,
    /// Field id.
    pub field_id: i32,
    /// Data file URI.
    pub file_path: String,
    /// Rows in the file.
    pub file_count: i64,
    /// Lower bound, `None` when the file has none.
    pub lower: Option<BoundValue>,
    /// Upper bound, `None` when the file has none.
    pub upper: Option<BoundValue>,
}

/// Collect the bounds of `field_name` (dotted for nested fields) for every
/// live file of the current snapshot, in manifest-list order.
///
/// A table without snapshot yields an empty list. Fields whose type has no
/// supported decoding fail with [`TableError::UnsupportedType`] before any
/// manifest is read.
pub async fn field_bound_values(
    location: &TableLocation,
    field_name: &str,
    config: &FieldBoundValuesConfig,
    io_concurrency: usize,
) -> Result<Vec<FieldBoundValues>, TableError> {
    let table = VersionHintCatalog::new(location.clone()).load_table().await?;
    let field = table
        .current_schema()?
        .find_field_by_name(field_name)
        .context(FieldNotFoundSnafu { name: field_name })?;
    let kind = decodable_type(field)?;

    let current = manifests::current_manifests(&table).await?;
    let loaded = manifests::load_manifests_with_entries(location, current, io_concurrency).await?;
    collect_bounds(&loaded, field, kind, config)
}

fn decodable_type(field: &NestedField) -> Result<PrimitiveType, TableError> {
    match field.field_type.as_ref() {
        Type::Primitive(
            p @ (PrimitiveType::Boolean
            | PrimitiveType::Int
            | PrimitiveType::Long
            | PrimitiveType::Float
            | PrimitiveType::Double
            | PrimitiveType::String),
        ) => Ok(*p),
        other => UnsupportedTypeSnafu {
            field: field.name.as_str(),
            field_type: other.to_string(),
        }
        .fail(),
    }
}

fn collect_bounds(
    manifests: &[ManifestWithEntries],
    field: &NestedField,
    kind: PrimitiveType,
    config: &FieldBoundValuesConfig,
) -> Result<Vec<FieldBoundValues>, TableError> {
    manifests
        .iter()
        .flat_map(|m| m.live_entries())
        .map(|entry| file_bounds(entry, field, kind, config))
        .collect()
}

fn file_bounds(
    entry: &ManifestEntry,
    field: &NestedField,
    kind: PrimitiveType,
    config: &FieldBoundValuesConfig,
) -> Result<FieldBoundValues, TableError> {
    let file = &entry.data_file;
    let path = file.file_path.as_str();
    ensure!(
        !(config.fail_on_delete_files && file.content != DataContentType::Data),
        DeleteFilesPresentSnafu { path }
    );

    let lower = file.lower_bounds.get(&field.id);
    let upper = file.upper_bounds.get(&field.id);
    ensure!(
        !(config.fail_on_missing_values && (lower.is_none() || upper.is_none())),
        MissingBoundValueSnafu {
            field: field.name.as_str(),
            path,
        }
    );

    let decode = |bytes: Option<&Vec<u8>>| match bytes {
        Some(bytes) => decode_bound(kind, bytes).context(MalformedBoundSnafu {
            field: field.name.as_str(),
            path,
            len: bytes.len(),
        }),
        None => Ok(None),
    };

    Ok(FieldBoundValues {
        field_name: field.name.clone(),
        field_id: field.id,
        file_path: file.file_path.clone(),
        file_count: file.record_count,
        lower: decode(lower)?,
        upper: decode(upper)?,
    })
}

/// Decode single-value serialized bytes. Empty input means "no value" for
/// fixed-width types and the empty string for `string`; `None` from the
/// outer option means the length is wrong for `kind`.
fn decode_bound(kind: PrimitiveType, bytes: &[u8]) -> Option<Option<BoundValue>> {
    if bytes.is_empty() && kind != PrimitiveType::String {
        return Some(None);
    }
    let value = match kind {
        PrimitiveType::Boolean => match bytes {
            [b] => BoundValue::Boolean(*b != 0),
            _ => return None,
        },
        PrimitiveType::Int => BoundValue::Int(i32::from_le_bytes(bytes.try_into().ok()?)),
        PrimitiveType::Long => BoundValue::Long(i64::from_le_bytes(bytes.try_into().ok()?)),
        PrimitiveType::Float => BoundValue::Float(f32::from_le_bytes(bytes.try_into().ok()?)),
        PrimitiveType::Double => BoundValue::Double(f64::from_le_bytes(bytes.try_into().ok()?)),
        PrimitiveType::String => BoundValue::String(String::from_utf8_lossy(bytes).into_owned()),
        PrimitiveType::Binary | PrimitiveType::Fixed(_) => return None,
    };
    Some(Some(value))
}
