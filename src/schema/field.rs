//! Field descriptors extracted from an XForm

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a field, taken from its `<bind type="...">`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    #[default]
    String,
    Int,
    Decimal,
    Date,
    DateTime,
    Select1,
    Select,
    Geopoint,
    Binary,
    /// Any bind type outside the core set (time, barcode, ...)
    Other(String),
}

impl FieldType {
    /// Parse a bind type, accepting the `xsd:` prefixed spellings
    pub fn from_bind(value: &str) -> Self {
        let value = value.trim();
        let bare = value.strip_prefix("xsd:").unwrap_or(value);
        match bare {
            "string" => FieldType::String,
            "int" | "integer" => FieldType::Int,
            "decimal" => FieldType::Decimal,
            "date" => FieldType::Date,
            "dateTime" => FieldType::DateTime,
            "select1" => FieldType::Select1,
            "select" => FieldType::Select,
            "geopoint" => FieldType::Geopoint,
            "binary" => FieldType::Binary,
            _ => FieldType::Other(bare.to_string()),
        }
    }

    /// True for single and multiple choice fields
    pub fn is_select(&self) -> bool {
        matches!(self, FieldType::Select | FieldType::Select1)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Int => write!(f, "int"),
            FieldType::Decimal => write!(f, "decimal"),
            FieldType::Date => write!(f, "date"),
            FieldType::DateTime => write!(f, "dateTime"),
            FieldType::Select1 => write!(f, "select1"),
            FieldType::Select => write!(f, "select"),
            FieldType::Geopoint => write!(f, "geopoint"),
            FieldType::Binary => write!(f, "binary"),
            FieldType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// One data field of a schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    /// Element name, unique within the schema
    pub name: String,
    /// Declared type
    pub field_type: FieldType,
    /// Whether the bind marks the field as required
    pub required: bool,
    /// Option values for select/select1 fields, in body order
    pub options: Vec<String>,
    /// Enclosing group names, outermost first
    pub group_path: Vec<String>,
}
