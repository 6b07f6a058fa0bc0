//! Records, record shapes, and input normalization.
//!
//! A [`Record`] is an ordered, case-insensitive mapping of field names to
//! [`Value`]s. Producers hand records in as raw JSON bytes, JSON text, a
//! parsed JSON object, or a ready-made [`Record`]; [`normalize`] turns all of
//! these into the canonical form.
//!
//! A [`RecordShape`] is the caller-supplied descriptor of a record type: the
//! ordered list of field names and their declared types. It replaces runtime
//! type inspection when building tables and when materializing query results.
//!
//! # Example
//!
//! ```rust
//! use rowsync::record::{normalize, RecordInput};
//! use rowsync::value::Value;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let record = normalize(RecordInput::from(r#"{"Id": 7, "name": "a", "tag": null}"#))?;
//! assert_eq!(record.get("ID"), Some(&Value::Int(7)));
//! assert_eq!(record.get("tag"), Some(&Value::Null));
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RecordError;
use crate::timestamp;
use crate::value::{FieldType, Value};

/// An ordered mapping of field name to value with case-insensitive lookup.
///
/// Inserting a name that differs only in case from an existing field
/// replaces that field's value and keeps its original spelling and position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }

    /// Sets a field, returning the previous value if the field existed.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(index) => Some(std::mem::replace(&mut self.fields[index].1, value)),
            None => {
                self.fields.push((name, value));
                None
            }
        }
    }

    /// Builder-style [`Record::insert`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Looks up a field by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.position(name).map(|index| &self.fields[index].1)
    }

    /// Mutable lookup by name, ignoring case.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.position(name).map(|index| &mut self.fields[index].1)
    }

    /// Removes a field by name, ignoring case.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.position(name).map(|index| self.fields.remove(index).1)
    }

    /// Returns `true` if the record has a field with this name.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Number of fields, null or not.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Drops every field whose value is null.
    pub fn retain_non_null(&mut self) {
        self.fields.retain(|(_, value)| !value.is_null());
    }

    /// Reads a field as a typed value. Absent and null fields give `None`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::TypeMismatch`] if the value cannot be
    /// converted to `T`.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<Option<T>, RecordError> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::from_value(value)
                .map(Some)
                .ok_or_else(|| RecordError::TypeMismatch {
                    field: name.to_string(),
                    expected: T::TYPE_NAME.to_string(),
                    found: value.to_string(),
                }),
        }
    }

    /// Converts the record into a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (name, value) in iter {
            record.insert(name, value);
        }
        record
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

/// Conversion from a record [`Value`] into a Rust type.
pub trait FromValue: Sized {
    /// Type name used in mismatch errors.
    const TYPE_NAME: &'static str;

    /// Converts the value, or returns `None` if it has the wrong type.
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for i32 {
    const TYPE_NAME: &'static str = "int";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(*v),
            Value::BigInt(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    const TYPE_NAME: &'static str = "big_int";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromValue for f32 {
    const TYPE_NAME: &'static str = "float";

    #[allow(clippy::cast_possible_truncation)]
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(v) => Some(*v),
            other => other.as_f64().map(|v| v as f32),
        }
    }
}

impl FromValue for f64 {
    const TYPE_NAME: &'static str = "double";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for bool {
    const TYPE_NAME: &'static str = "bool";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromValue for String {
    const TYPE_NAME: &'static str = "string";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromValue for DateTime<Utc> {
    const TYPE_NAME: &'static str = "timestamp";

    fn from_value(value: &Value) -> Option<Self> {
        timestamp::to_date_time("", value).ok()
    }
}

/// One field of a [`RecordShape`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Declared field type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl FieldSpec {
    /// Creates a field descriptor.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Ordered descriptor of a record type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordShape {
    fields: Vec<FieldSpec>,
}

impl RecordShape {
    /// Builds a shape from `(name, type)` pairs in declaration order.
    pub fn new<N: Into<String>>(fields: impl IntoIterator<Item = (N, FieldType)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, ty)| FieldSpec::new(name, ty))
                .collect(),
        }
    }

    /// Infers a shape from a template record. Null fields are skipped since
    /// their type is unknown.
    pub fn from_template(record: &Record) -> Self {
        Self {
            fields: record
                .iter()
                .filter_map(|(name, value)| {
                    value.field_type().map(|ty| FieldSpec::new(name, ty))
                })
                .collect(),
        }
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Looks up a field by name, ignoring case.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|field| field.name.eq_ignore_ascii_case(name))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the shape has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// A record with every field of the shape set to null.
    pub fn empty_record(&self) -> Record {
        self.fields
            .iter()
            .map(|field| (field.name.clone(), Value::Null))
            .collect()
    }
}

/// Mapping contract between a Rust type and a flat record.
///
/// Implement this for a struct to write it with
/// [`TableDao::insert_or_update`](crate::dao::TableDao::insert_or_update)
/// and read it back with
/// [`TableDao::get_entity`](crate::dao::TableDao::get_entity).
pub trait Entity: Sized {
    /// The record shape of this type.
    fn shape() -> RecordShape;

    /// Converts the value into a record. Absent optional fields are null.
    fn to_record(&self) -> Record;

    /// Builds the value from a materialized record.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] if a field has an unexpected type.
    fn from_record(record: &Record) -> Result<Self, RecordError>;
}

/// The input forms accepted by the write path.
#[derive(Debug, Clone)]
pub enum RecordInput<'a> {
    /// UTF-8 encoded JSON object.
    Bytes(&'a [u8]),
    /// JSON object text.
    Text(&'a str),
    /// Already-parsed JSON value. Must be an object.
    Json(serde_json::Value),
    /// A record.
    Record(Record),
}

impl<'a> From<&'a [u8]> for RecordInput<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a> From<&'a str> for RecordInput<'a> {
    fn from(text: &'a str) -> Self {
        Self::Text(text)
    }
}

impl<'a> From<&'a String> for RecordInput<'a> {
    fn from(text: &'a String) -> Self {
        Self::Text(text)
    }
}

impl From<serde_json::Value> for RecordInput<'_> {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for RecordInput<'_> {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self::Json(serde_json::Value::Object(map))
    }
}

impl From<Record> for RecordInput<'_> {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

/// Converts any accepted input into a [`Record`].
///
/// Null fields are kept; dropping them is the writer's job.
///
/// # Errors
///
/// Returns [`RecordError`] for invalid UTF-8, malformed JSON, non-object
/// JSON, or nested arrays/objects.
pub fn normalize(input: RecordInput<'_>) -> Result<Record, RecordError> {
    match input {
        RecordInput::Bytes(bytes) => normalize_text(std::str::from_utf8(bytes)?),
        RecordInput::Text(text) => normalize_text(text),
        RecordInput::Json(value) => normalize_json(value),
        RecordInput::Record(record) => Ok(record),
    }
}

fn normalize_text(text: &str) -> Result<Record, RecordError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|source| RecordError::Parse { source })?;
    normalize_json(value)
}

fn normalize_json(value: serde_json::Value) -> Result<Record, RecordError> {
    let serde_json::Value::Object(map) = value else {
        return Err(RecordError::NotAnObject {
            found: json_kind(&value).to_string(),
        });
    };
    let mut record = Record::new();
    for (name, value) in map {
        let value = json_scalar(&name, value)?;
        record.insert(name, value);
    }
    Ok(record)
}

fn json_scalar(field: &str, value: serde_json::Value) -> Result<Value, RecordError> {
    match value {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_json::Value::String(s) => Ok(Value::Text(s)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i32::try_from(i).map_or(Value::BigInt(i), Value::Int))
            } else {
                // u64 beyond i64::MAX, or a float
                Ok(Value::Double(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        other => Err(RecordError::NonScalar {
            field: field.to_string(),
            found: json_kind(&other).to_string(),
        }),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_record() {
        let mut record = Record::new().with("processUuid", "p1").with("name", "a");
        assert_eq!(record.get("PROCESSUUID"), Some(&Value::from("p1")));

        let previous = record.insert("NAME", "b");
        assert_eq!(previous, Some(Value::from("a")));
        assert_eq!(record.len(), 2);

        let names: Vec<_> = record.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["processUuid", "name"]);
    }

    #[test]
    fn test_normalize_all_input_forms() {
        let text = r#"{"id": 1, "big": 5000000000, "load": 0.5, "ok": true, "host": "h1"}"#;
        let from_text = normalize(RecordInput::from(text)).unwrap();
        let from_bytes = normalize(RecordInput::from(text.as_bytes())).unwrap();
        let json: serde_json::Value = serde_json::from_str(text).unwrap();
        let from_json = normalize(RecordInput::from(json)).unwrap();

        assert_eq!(from_text, from_bytes);
        assert_eq!(from_text, from_json);
        assert_eq!(from_text.get("id"), Some(&Value::Int(1)));
        assert_eq!(from_text.get("big"), Some(&Value::BigInt(5_000_000_000)));
        assert_eq!(from_text.get("load"), Some(&Value::Double(0.5)));
        assert_eq!(from_text.get("ok"), Some(&Value::Bool(true)));

        let names: Vec<_> = from_text.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["id", "big", "load", "ok", "host"]);
    }

    #[test]
    fn test_normalize_rejects_non_objects() {
        assert!(matches!(
            normalize(RecordInput::from("[1, 2]")),
            Err(RecordError::NotAnObject { .. })
        ));
        assert!(matches!(
            normalize(RecordInput::from("{not json")),
            Err(RecordError::Parse { .. })
        ));
        assert!(matches!(
            normalize(RecordInput::from(r#"{"stack": [1, 2]}"#)),
            Err(RecordError::NonScalar { .. })
        ));
        let invalid: &[u8] = &[0xff, 0xfe];
        assert!(matches!(
            normalize(RecordInput::from(invalid)),
            Err(RecordError::Utf8(_))
        ));
    }

    #[test]
    fn test_shape_from_template_skips_nulls() {
        let template = Record::new()
            .with("id", 1i64)
            .with("tag", Value::Null)
            .with("load", 0.1f64);
        let shape = RecordShape::from_template(&template);
        assert_eq!(shape.len(), 2);
        assert_eq!(shape.field("ID").unwrap().field_type, FieldType::BigInt);
        assert!(shape.field("tag").is_none());
    }

    #[test]
    fn test_get_as() {
        let record = Record::new().with("count", 3i32).with("name", "x");
        assert_eq!(record.get_as::<i64>("count").unwrap(), Some(3));
        assert_eq!(record.get_as::<i64>("missing").unwrap(), None);
        assert!(record.get_as::<bool>("name").is_err());
    }

    #[test]
    fn test_shape_serde_round_trip_format() {
        let json = r#"[{"name": "id", "type": "big_int"}, {"name": "host", "type": "string"}]"#;
        let shape: RecordShape = serde_json::from_str(json).unwrap();
        assert_eq!(shape.fields()[1], FieldSpec::new("host", FieldType::String));
    }
}
