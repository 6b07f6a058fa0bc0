//! Field-to-column type mapping.
//!
//! The mapping is a pure function of the field's declared type, its role in
//! the table, and two caller flags: whether the field holds a timestamp and
//! whether a string field needs large-text storage.
//!
//! | Field                      | Column         |
//! |----------------------------|----------------|
//! | timestamp-flagged or date  | `DATETIME`     |
//! | string, text-flagged       | `TEXT`         |
//! | string, key or index       | `VARCHAR(150)` |
//! | string, plain              | `VARCHAR(250)` |
//! | 32-bit integer             | `INT`          |
//! | 64-bit integer             | `BIGINT`       |
//! | single-precision float     | `FLOAT`        |
//! | double-precision float     | `DOUBLE`       |
//! | boolean                    | `TINYINT`      |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::value::FieldType;

/// VARCHAR width for primary-key and index columns.
///
/// Kept small so composite keys fit the store's index key length limit.
pub const KEY_VARCHAR_WIDTH: u16 = 150;

/// VARCHAR width for all other string columns.
pub const PLAIN_VARCHAR_WIDTH: u16 = 250;

/// Role a column plays in its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    /// Part of the primary key.
    PrimaryKey,
    /// Has a secondary index.
    Index,
    /// Neither.
    Plain,
}

impl ColumnRole {
    /// Returns `true` for primary-key and index columns.
    pub fn is_keyed(self) -> bool {
        !matches!(self, Self::Plain)
    }
}

/// SQL column type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// `DATETIME`
    Datetime,
    /// `TEXT`, a large-object string.
    Text,
    /// `VARCHAR(n)`
    Varchar(u16),
    /// `INT`
    Int,
    /// `BIGINT`
    BigInt,
    /// `FLOAT`
    Float,
    /// `DOUBLE`
    Double,
    /// `TINYINT`
    TinyInt,
    /// A type reported by store metadata that this crate never creates.
    Other(String),
}

impl ColumnType {
    /// Parses a type name as reported by store metadata.
    ///
    /// Unknown names become [`ColumnType::Other`]; such columns are written
    /// as opaque scalars.
    pub fn from_sql_name(name: &str) -> Self {
        let upper = name.trim().to_ascii_uppercase();
        let (base, args) = match upper.split_once('(') {
            Some((base, rest)) => (base.trim(), Some(rest.trim_end_matches(')').trim())),
            None => (upper.as_str(), None),
        };
        match base {
            "DATETIME" | "TIMESTAMP" | "DATE" => Self::Datetime,
            "TEXT" | "CLOB" | "LONGTEXT" | "MEDIUMTEXT" => Self::Text,
            "VARCHAR" | "CHARACTER VARYING" => {
                let width = args
                    .and_then(|a| a.parse().ok())
                    .unwrap_or(PLAIN_VARCHAR_WIDTH);
                Self::Varchar(width)
            }
            "INT" | "INTEGER" | "MEDIUMINT" => Self::Int,
            "BIGINT" => Self::BigInt,
            "FLOAT" | "REAL" => Self::Float,
            "DOUBLE" | "DOUBLE PRECISION" => Self::Double,
            "TINYINT" | "BOOLEAN" | "BOOL" | "BIT" => Self::TinyInt,
            _ => Self::Other(name.trim().to_string()),
        }
    }

    /// Returns `true` for `DATETIME`.
    pub fn is_datetime(&self) -> bool {
        matches!(self, Self::Datetime)
    }

    /// Returns `true` for `TEXT`.
    pub fn is_large_text(&self) -> bool {
        matches!(self, Self::Text)
    }

    /// VARCHAR width, if this is a bounded string.
    pub fn width(&self) -> Option<u16> {
        match self {
            Self::Varchar(width) => Some(*width),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Datetime => f.write_str("DATETIME"),
            Self::Text => f.write_str("TEXT"),
            Self::Varchar(width) => write!(f, "VARCHAR({width})"),
            Self::Int => f.write_str("INT"),
            Self::BigInt => f.write_str("BIGINT"),
            Self::Float => f.write_str("FLOAT"),
            Self::Double => f.write_str("DOUBLE"),
            Self::TinyInt => f.write_str("TINYINT"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// Maps a field to its column type.
///
/// # Errors
///
/// Returns [`SchemaError::UnsupportedType`] for field types with no column
/// mapping.
pub fn map_column_type(
    field: &str,
    field_type: FieldType,
    role: ColumnRole,
    timestamp: bool,
    text: bool,
) -> Result<ColumnType, SchemaError> {
    if timestamp || field_type == FieldType::Timestamp {
        return Ok(ColumnType::Datetime);
    }
    match field_type {
        FieldType::String if text => Ok(ColumnType::Text),
        FieldType::String if role.is_keyed() => Ok(ColumnType::Varchar(KEY_VARCHAR_WIDTH)),
        FieldType::String => Ok(ColumnType::Varchar(PLAIN_VARCHAR_WIDTH)),
        FieldType::Int => Ok(ColumnType::Int),
        FieldType::BigInt => Ok(ColumnType::BigInt),
        FieldType::Float => Ok(ColumnType::Float),
        FieldType::Double => Ok(ColumnType::Double),
        FieldType::Bool => Ok(ColumnType::TinyInt),
        FieldType::Timestamp => Ok(ColumnType::Datetime),
        FieldType::Binary => Err(SchemaError::UnsupportedType {
            field: field.to_string(),
            field_type: field_type.to_string(),
        }),
    }
}
