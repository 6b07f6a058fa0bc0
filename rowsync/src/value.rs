//! Scalar value model shared by records, bind parameters, and result sets.
//!
//! Two value types exist. [`Value`] is what a record field holds on the
//! write side and after materialization. [`SqlValue`] is what a driver hands
//! back for a result column, carrying the store's own width information
//! (narrow integers, large-object text) that the materializer coerces away.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A record field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    Null,
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    BigInt(i64),
    /// Single-precision float.
    Float(f32),
    /// Double-precision float.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 text.
    Text(String),
    /// Point in time, UTC.
    Timestamp(DateTime<Utc>),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The field type this value carries, or `None` for null.
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            Self::Null => None,
            Self::Int(_) => Some(FieldType::Int),
            Self::BigInt(_) => Some(FieldType::BigInt),
            Self::Float(_) => Some(FieldType::Float),
            Self::Double(_) => Some(FieldType::Double),
            Self::Bool(_) => Some(FieldType::Bool),
            Self::Text(_) => Some(FieldType::String),
            Self::Timestamp(_) => Some(FieldType::Timestamp),
            Self::Bytes(_) => Some(FieldType::Binary),
        }
    }

    /// Integer view of the value, widening 32-bit integers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(i64::from(*v)),
            Self::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Floating point view of numeric values.
    #[allow(clippy::cast_precision_loss)] // epoch values stay well inside f64 precision
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(f64::from(*v)),
            Self::BigInt(v) => Some(*v as f64),
            Self::Float(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view of the value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Converts the value into JSON. Timestamps render as RFC 3339.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Int(v) => (*v).into(),
            Self::BigInt(v) => (*v).into(),
            Self::Float(v) => f64::from(*v).into(),
            Self::Double(v) => (*v).into(),
            Self::Bool(v) => (*v).into(),
            Self::Text(s) => s.clone().into(),
            Self::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Millis, true).into(),
            Self::Bytes(bytes) => bytes.iter().copied().map(serde_json::Value::from).collect(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Int(v) => write!(f, "{v}"),
            Self::BigInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Self::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Declared type of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    BigInt,
    /// Single-precision float.
    Float,
    /// Double-precision float.
    Double,
    /// Boolean.
    Bool,
    /// Text.
    String,
    /// Date/time.
    Timestamp,
    /// Raw bytes. Has no column mapping.
    Binary,
}

impl FieldType {
    /// Name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::BigInt => "big_int",
            Self::Float => "float",
            Self::Double => "double",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Timestamp => "timestamp",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A result column value as returned by a driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// 8-bit integer (TINYINT).
    TinyInt(i8),
    /// 16-bit integer (SMALLINT).
    SmallInt(i16),
    /// 32-bit integer (INT).
    Int(i32),
    /// 64-bit integer (BIGINT).
    BigInt(i64),
    /// FLOAT.
    Float(f32),
    /// DOUBLE.
    Double(f64),
    /// Native boolean.
    Bool(bool),
    /// Bounded string (VARCHAR).
    Text(String),
    /// Large-object text, as raw UTF-8 bytes.
    LargeText(Vec<u8>),
    /// DATETIME.
    Timestamp(DateTime<Utc>),
    /// Binary data.
    Bytes(Vec<u8>),
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::TinyInt(v) => write!(f, "{v}"),
            Self::SmallInt(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::BigInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::LargeText(bytes) => write!(f, "{:?}", String::from_utf8_lossy(bytes)),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Self::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

impl SqlValue {
    /// Converts a raw column value into a record value without a target
    /// field type. Narrow integers widen and large text decodes.
    pub fn into_value(self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::TinyInt(v) => Value::Int(i32::from(v)),
            Self::SmallInt(v) => Value::Int(i32::from(v)),
            Self::Int(v) => Value::Int(v),
            Self::BigInt(v) => Value::BigInt(v),
            Self::Float(v) => Value::Float(v),
            Self::Double(v) => Value::Double(v),
            Self::Bool(v) => Value::Bool(v),
            Self::Text(s) => Value::Text(s),
            Self::LargeText(bytes) => Value::Text(String::from_utf8_lossy(&bytes).into_owned()),
            Self::Timestamp(ts) => Value::Timestamp(ts),
            Self::Bytes(bytes) => Value::Bytes(bytes),
        }
    }
}
