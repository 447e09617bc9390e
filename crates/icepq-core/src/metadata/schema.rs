//! Table schema: a tree of fields with stable integer ids.
//!
//! The JSON form matches Iceberg:
//!
//! ```json
//! {
//!   "type": "struct",
//!   "schema-id": 0,
//!   "fields": [
//!     { "id": 1, "name": "block", "required": true, "type": "long" },
//!     { "id": 2, "name": "tags", "required": false,
//!       "type": { "type": "list", "element-id": 3, "element": "string", "element-required": true } }
//!   ]
//! }
//! ```
//!
//! Two schemas are *structurally equal* when their field trees (ids, names,
//! required flags and types) are identical; the schema id is ignored.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Leaf value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    /// `boolean`
    Boolean,
    /// `int`: 32-bit signed integer.
    Int,
    /// `long`: 64-bit signed integer.
    Long,
    /// `float`: 32-bit IEEE 754.
    Float,
    /// `double`: 64-bit IEEE 754.
    Double,
    /// `string`: UTF-8 text.
    String,
    /// `binary`: arbitrary-length bytes.
    Binary,
    /// `fixed[L]`: exactly `L` bytes.
    Fixed(u64),
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveType::Boolean => f.write_str("boolean"),
            PrimitiveType::Int => f.write_str("int"),
            PrimitiveType::Long => f.write_str("long"),
            PrimitiveType::Float => f.write_str("float"),
            PrimitiveType::Double => f.write_str("double"),
            PrimitiveType::String => f.write_str("string"),
            PrimitiveType::Binary => f.write_str("binary"),
            PrimitiveType::Fixed(len) => write!(f, "fixed[{len}]"),
        }
    }
}

impl FromStr for PrimitiveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "boolean" => Ok(PrimitiveType::Boolean),
            "int" => Ok(PrimitiveType::Int),
            "long" => Ok(PrimitiveType::Long),
            "float" => Ok(PrimitiveType::Float),
            "double" => Ok(PrimitiveType::Double),
            "string" => Ok(PrimitiveType::String),
            "binary" => Ok(PrimitiveType::Binary),
            other => other
                .strip_prefix("fixed[")
                .and_then(|rest| rest.strip_suffix(']'))
                .and_then(|len| len.trim().parse::<u64>().ok())
                .map(PrimitiveType::Fixed)
                .ok_or_else(|| format!("unsupported primitive type {other:?}")),
        }
    }
}

impl Serialize for PrimitiveType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PrimitiveType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A struct: an ordered list of named fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructType {
    /// Fields in declaration order.
    pub fields: Vec<NestedField>,
}

/// A list whose element is itself a field (with its own id and required flag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListType {
    /// The element field, conventionally named `element`.
    pub element_field: NestedField,
}

/// Any field type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TypeSerde", into = "TypeSerde")]
pub enum Type {
    /// A leaf value.
    Primitive(PrimitiveType),
    /// A nested struct.
    Struct(StructType),
    /// A list.
    List(ListType),
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(p) => write!(f, "{p}"),
            Type::Struct(s) => {
                f.write_str("struct<")?;
                for (i, field) in s.fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.field_type)?;
                }
                f.write_str(">")
            }
            Type::List(l) => write!(f, "list<{}>", l.element_field.field_type),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum TypeSerde {
    Primitive(PrimitiveType),
    Nested(NestedTypeSerde),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum NestedTypeSerde {
    Struct {
        fields: Vec<NestedField>,
    },
    List {
        #[serde(rename = "element-id")]
        element_id: i32,
        element: Box<Type>,
        #[serde(rename = "element-required")]
        element_required: bool,
    },
}

impl From<TypeSerde> for Type {
    fn from(value: TypeSerde) -> Self {
        match value {
            TypeSerde::Primitive(p) => Type::Primitive(p),
            TypeSerde::Nested(NestedTypeSerde::Struct { fields }) => {
                Type::Struct(StructType { fields })
            }
            TypeSerde::Nested(NestedTypeSerde::List {
                element_id,
                element,
                element_required,
            }) => Type::List(ListType {
                element_field: NestedField::new(
                    element_id,
                    ListType::ELEMENT_NAME,
                    *element,
                    element_required,
                ),
            }),
        }
    }
}

impl From<Type> for TypeSerde {
    fn from(value: Type) -> Self {
        match value {
            Type::Primitive(p) => TypeSerde::Primitive(p),
            Type::Struct(s) => TypeSerde::Nested(NestedTypeSerde::Struct { fields: s.fields }),
            Type::List(l) => TypeSerde::Nested(NestedTypeSerde::List {
                element_id: l.element_field.id,
                element_required: l.element_field.required,
                element: l.element_field.field_type,
            }),
        }
    }
}

impl ListType {
    /// Name of the list element field.
    pub const ELEMENT_NAME: &'static str = "element";
}

/// A named, identified field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedField {
    /// Field id, unique within a schema.
    pub id: i32,
    /// Field name, unique among its siblings.
    pub name: String,
    /// Whether values may never be null.
    pub required: bool,
    /// Field type.
    #[serde(rename = "type")]
    pub field_type: Box<Type>,
    /// Optional documentation string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl NestedField {
    /// Build a field without documentation.
    pub fn new(id: i32, name: impl Into<String>, field_type: Type, required: bool) -> Self {
        NestedField {
            id,
            name: name.into(),
            required,
            field_type: Box::new(field_type),
            doc: None,
        }
    }

    /// Shorthand for a required field.
    pub fn required(id: i32, name: impl Into<String>, field_type: Type) -> Self {
        Self::new(id, name, field_type, true)
    }

    /// Shorthand for an optional field.
    pub fn optional(id: i32, name: impl Into<String>, field_type: Type) -> Self {
        Self::new(id, name, field_type, false)
    }

    fn max_id(&self) -> i32 {
        let nested = match self.field_type.as_ref() {
            Type::Primitive(_) => 0,
            Type::Struct(s) => s.fields.iter().map(NestedField::max_id).max().unwrap_or(0),
            Type::List(l) => l.element_field.max_id(),
        };
        self.id.max(nested)
    }
}

/// A versioned table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "struct", rename_all = "kebab-case")]
pub struct Schema {
    /// Id of this schema within the table metadata.
    pub schema_id: i32,
    /// Top-level fields.
    pub fields: Vec<NestedField>,
}

impl Schema {
    /// Build a schema from its top-level fields.
    pub fn new(schema_id: i32, fields: Vec<NestedField>) -> Self {
        Schema { schema_id, fields }
    }

    /// Structural equality: same field tree, schema id ignored.
    pub fn same_fields(&self, other: &Schema) -> bool {
        self.fields == other.fields
    }

    /// Highest field id used anywhere in the tree (0 for an empty schema).
    pub fn highest_field_id(&self) -> i32 {
        self.fields.iter().map(NestedField::max_id).max().unwrap_or(0)
    }

    /// Find a field by name. Nested struct fields use dotted paths
    /// (`outer.inner`); list elements are addressed as `list.element`.
    pub fn find_field_by_name(&self, name: &str) -> Option<&NestedField> {
        let mut parts = name.split('.');
        let first = parts.next()?;
        let mut current = self.fields.iter().find(|f| f.name == first)?;

        for part in parts {
            current = match current.field_type.as_ref() {
                Type::Struct(s) => s.fields.iter().find(|f| f.name == part)?,
                Type::List(l) if part == ListType::ELEMENT_NAME => &l.element_field,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Resolve a Parquet leaf column path (struct nesting only) to its field.
    ///
    /// Paths that cross a list return `None`; their statistics are not
    /// tracked per field.
    pub fn field_for_column_path(&self, path: &[String]) -> Option<&NestedField> {
        let (first, rest) = path.split_first()?;
        let mut current = self.fields.iter().find(|f| &f.name == first)?;

        for part in rest {
            current = match current.field_type.as_ref() {
                Type::Struct(s) => s.fields.iter().find(|f| &f.name == part)?,
                _ => return None,
            };
        }
        match current.field_type.as_ref() {
            Type::Primitive(_) => Some(current),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        Schema::new(
            0,
            vec![
                NestedField::required(1, "block", Type::Primitive(PrimitiveType::Long)),
                NestedField::optional(
                    2,
                    "tx",
                    Type::Struct(StructType {
                        fields: vec![
                            NestedField::required(3, "hash", Type::Primitive(PrimitiveType::Fixed(32))),
                            NestedField::optional(4, "value", Type::Primitive(PrimitiveType::Double)),
                        ],
                    }),
                ),
                NestedField::optional(
                    5,
                    "tags",
                    Type::List(ListType {
                        element_field: NestedField::required(
                            6,
                            ListType::ELEMENT_NAME,
                            Type::Primitive(PrimitiveType::String),
                        ),
                    }),
                ),
            ],
        )
    }

    #[test]
    fn schema_json_matches_iceberg_layout() -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_value(sample_schema())?;

        assert_eq!(json["type"], "struct");
        assert_eq!(json["schema-id"], 0);
        assert_eq!(json["fields"][0]["type"], "long");
        assert_eq!(json["fields"][1]["type"]["type"], "struct");
        assert_eq!(json["fields"][1]["type"]["fields"][0]["type"], "fixed[32]");
        assert_eq!(json["fields"][2]["type"]["type"], "list");
        assert_eq!(json["fields"][2]["type"]["element-id"], 6);
        assert_eq!(json["fields"][2]["type"]["element"], "string");
        assert_eq!(json["fields"][2]["type"]["element-required"], true);

        let back: Schema = serde_json::from_value(json)?;
        assert_eq!(back, sample_schema());
        Ok(())
    }

    #[test]
    fn same_fields_ignores_schema_id() {
        let a = sample_schema();
        let mut b = sample_schema();
        b.schema_id = 7;
        assert!(a.same_fields(&b));

        b.fields[0].required = false;
        assert!(!a.same_fields(&b));
    }

    #[test]
    fn highest_field_id_walks_nested_types() {
        assert_eq!(sample_schema().highest_field_id(), 6);
        assert_eq!(Schema::new(0, vec![]).highest_field_id(), 0);
    }

    #[test]
    fn find_field_by_name_supports_dotted_paths() {
        let schema = sample_schema();

        assert_eq!(schema.find_field_by_name("block").map(|f| f.id), Some(1));
        assert_eq!(schema.find_field_by_name("tx.value").map(|f| f.id), Some(4));
        assert_eq!(schema.find_field_by_name("tags.element").map(|f| f.id), Some(6));
        assert!(schema.find_field_by_name("tx.missing").is_none());
        assert!(schema.find_field_by_name("block.inner").is_none());
    }

    #[test]
    fn field_for_column_path_skips_lists() {
        let schema = sample_schema();
        let path = |parts: &[&str]| parts.iter().map(|p| p.to_string()).collect::<Vec<_>>();

        assert_eq!(
            schema.field_for_column_path(&path(&["tx", "hash"])).map(|f| f.id),
            Some(3)
        );
        assert!(schema
            .field_for_column_path(&path(&["tags", "list", "element"]))
            .is_none());
    }

    #[test]
    fn primitive_type_parses_fixed_width() {
        assert_eq!("fixed[16]".parse::<PrimitiveType>(), Ok(PrimitiveType::Fixed(16)));
        assert!("decimal(10,2)".parse::<PrimitiveType>().is_err());
    }
}
