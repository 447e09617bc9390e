//! Table schema inference from a Parquet footer schema tree.
//!
//! Leaves map from their physical type (plus the UTF-8 annotation for byte
//! arrays); groups are either plain structs or the standard 3-level list
//! encoding:
//!
//! ```text
//! <optional|required> group <name> (LIST) {
//!   repeated group list {
//!     <optional|required> <element-type> element;
//!   }
//! }
//! ```
//!
//! Field ids are assigned depth-first, each field before its children,
//! starting at 1. A list field takes one id, its element the next.

use parquet::basic::{ConvertedType, LogicalType, Repetition, Type as PhysicalType};
use parquet::schema::types::Type as ParquetType;
use snafu::prelude::*;

use crate::metadata::{ListType, NestedField, PrimitiveType, Schema, StructType, Type};

/// Name Parquet writers give the root group.
pub const ROOT_GROUP_NAME: &str = "schema";

const LIST_GROUP_NAME: &str = "list";

/// Errors raised while mapping a Parquet schema to a table schema.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SchemaInferenceError {
    /// The root node is a leaf or carries an unexpected name.
    #[snafu(display("Parquet root must be a group named {ROOT_GROUP_NAME:?}, found {found:?}"))]
    InvalidRoot {
        /// Name (and kind) of the root node found.
        found: String,
    },

    /// A leaf uses a physical type or annotation with no table equivalent.
    #[snafu(display("Unsupported Parquet type for column {column}: {detail}"))]
    UnsupportedType {
        /// Dotted column path.
        column: String,
        /// Physical type and annotation.
        detail: String,
    },

    /// A LIST-annotated group does not follow the 3-level layout.
    #[snafu(display("Malformed list column {column}: {msg}"))]
    MalformedList {
        /// Dotted column path.
        column: String,
        /// What deviates from the layout.
        msg: String,
    },

    /// A group is annotated with something other than LIST (for example MAP).
    #[snafu(display("Unsupported Parquet group {column}: {detail}"))]
    UnsupportedGroup {
        /// Dotted column path.
        column: String,
        /// The annotation found.
        detail: String,
    },

    /// A repeated field outside the list layout (legacy 2-level lists).
    #[snafu(display("Repeated field {column} is only supported inside a 3-level list"))]
    UnsupportedRepetition {
        /// Dotted column path.
        column: String,
    },
}

/// Infer a table schema (schema id 0) from a Parquet root schema node.
pub fn infer_schema(root: &ParquetType) -> Result<Schema, SchemaInferenceError> {
    ensure!(
        root.is_group() && root.name() == ROOT_GROUP_NAME,
        InvalidRootSnafu {
            found: if root.is_group() {
                root.name().to_string()
            } else {
                format!("leaf {}", root.name())
            },
        }
    );

    let mut ids = FieldIds::default();
    let fields = root
        .get_fields()
        .iter()
        .map(|child| convert_field(child, "", &mut ids))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Schema::new(0, fields))
}

#[derive(Default)]
struct FieldIds {
    last: i32,
}

impl FieldIds {
    fn next(&mut self) -> i32 {
        self.last += 1;
        self.last
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

fn is_required(node: &ParquetType) -> bool {
    let info = node.get_basic_info();
    info.has_repetition() && info.repetition() == Repetition::REQUIRED
}

fn is_repeated(node: &ParquetType) -> bool {
    let info = node.get_basic_info();
    info.has_repetition() && info.repetition() == Repetition::REPEATED
}

fn convert_field(
    node: &ParquetType,
    parent: &str,
    ids: &mut FieldIds,
) -> Result<NestedField, SchemaInferenceError> {
    let column = join_path(parent, node.name());
    ensure!(
        !is_repeated(node),
        UnsupportedRepetitionSnafu {
            column: column.clone(),
        }
    );

    let id = ids.next();
    let field_type = convert_type(node, &column, ids)?;
    Ok(NestedField::new(id, node.name(), field_type, is_required(node)))
}

fn convert_type(
    node: &ParquetType,
    column: &str,
    ids: &mut FieldIds,
) -> Result<Type, SchemaInferenceError> {
    match node {
        ParquetType::PrimitiveType {
            physical_type,
            type_length,
            ..
        } => convert_primitive(node, *physical_type, *type_length, column).map(Type::Primitive),
        ParquetType::GroupType { fields, .. } => {
            let info = node.get_basic_info();
            let converted = info.converted_type();

            if matches!(info.logical_type(), Some(LogicalType::List))
                || converted == ConvertedType::LIST
            {
                return convert_list(fields, column, ids);
            }

            if info.logical_type().is_none() && converted == ConvertedType::NONE {
                let fields = fields
                    .iter()
                    .map(|child| convert_field(child, column, ids))
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(Type::Struct(StructType { fields }));
            }

            UnsupportedGroupSnafu {
                column,
                detail: match info.logical_type() {
                    Some(logical) => format!("{logical:?}"),
                    None => format!("{converted:?}"),
                },
            }
            .fail()
        }
    }
}

fn convert_list(
    fields: &[parquet::schema::types::TypePtr],
    column: &str,
    ids: &mut FieldIds,
) -> Result<Type, SchemaInferenceError> {
    let [repeated] = fields else {
        return MalformedListSnafu {
            column,
            msg: format!("expected one repeated child, found {}", fields.len()),
        }
        .fail();
    };

    ensure!(
        repeated.is_group() && is_repeated(repeated) && repeated.name() == LIST_GROUP_NAME,
        MalformedListSnafu {
            column,
            msg: format!(
                "child must be a repeated group named {LIST_GROUP_NAME:?}, found {:?}",
                repeated.name()
            ),
        }
    );

    let [element] = repeated.get_fields() else {
        return MalformedListSnafu {
            column,
            msg: format!(
                "repeated group must have one child, found {}",
                repeated.get_fields().len()
            ),
        }
        .fail();
    };

    ensure!(
        element.name() == ListType::ELEMENT_NAME,
        MalformedListSnafu {
            column,
            msg: format!(
                "element must be named {:?}, found {:?}",
                ListType::ELEMENT_NAME,
                element.name()
            ),
        }
    );

    let element_path = join_path(column, ListType::ELEMENT_NAME);
    let element_field = convert_field(element, column, ids).map_err(|e| match e {
        SchemaInferenceError::UnsupportedRepetition { .. } => SchemaInferenceError::MalformedList {
            column: element_path,
            msg: "element must not be repeated".to_string(),
        },
        other => other,
    })?;

    Ok(Type::List(ListType { element_field }))
}

fn convert_primitive(
    node: &ParquetType,
    physical: PhysicalType,
    type_length: i32,
    column: &str,
) -> Result<PrimitiveType, SchemaInferenceError> {
    let info = node.get_basic_info();
    let unsupported = |detail: String| {
        UnsupportedTypeSnafu {
            column,
            detail,
        }
        .build()
    };

    match physical {
        PhysicalType::BOOLEAN => Ok(PrimitiveType::Boolean),
        PhysicalType::INT32 => Ok(PrimitiveType::Int),
        PhysicalType::INT64 => Ok(PrimitiveType::Long),
        PhysicalType::FLOAT => Ok(PrimitiveType::Float),
        PhysicalType::DOUBLE => Ok(PrimitiveType::Double),
        PhysicalType::BYTE_ARRAY => {
            let converted = info.converted_type();
            match info.logical_type() {
                Some(LogicalType::String) => Ok(PrimitiveType::String),
                Some(other) => Err(unsupported(format!("BYTE_ARRAY annotated {other:?}"))),
                None if converted == ConvertedType::UTF8 => Ok(PrimitiveType::String),
                None if converted == ConvertedType::NONE => Ok(PrimitiveType::Binary),
                None => Err(unsupported(format!("BYTE_ARRAY annotated {converted:?}"))),
            }
        }
        PhysicalType::FIXED_LEN_BYTE_ARRAY => u64::try_from(type_length)
            .ok()
            .filter(|len| *len > 0)
            .map(PrimitiveType::Fixed)
            .ok_or_else(|| {
                unsupported(format!("FIXED_LEN_BYTE_ARRAY with length {type_length}"))
            }),
        PhysicalType::INT96 => Err(unsupported("INT96".to_string())),
    }
}
