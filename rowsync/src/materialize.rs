//! Turns result sets back into records.
//!
//! Each row starts as the target shape's empty record (every field null).
//! Columns are matched to fields by name, ignoring case; columns with no
//! matching field are skipped. Null columns leave the field null, which
//! differs from the write path where nulls are never sent.
//!
//! Coercions by target field type:
//!
//! - `DATETIME` into a 64-bit integer field gives epoch milliseconds, into a
//!   double field gives fractional epoch seconds
//! - integer columns into a boolean field are `true` iff nonzero
//! - large text decodes to a string
//! - numbers widen to the field's numeric type

use crate::connection::{ColumnMeta, ResultSet};
use crate::error::QueryError;
use crate::record::{FieldSpec, Record, RecordShape};
use crate::timestamp;
use crate::value::{FieldType, SqlValue, Value};

/// Materializes every row of a result into records of `shape`.
///
/// # Errors
///
/// Returns [`QueryError::Coercion`] if a column value cannot be converted
/// into its field's type.
pub fn materialize(result: ResultSet, shape: &RecordShape) -> Result<Vec<Record>, QueryError> {
    let ResultSet { columns, rows } = result;
    rows.into_iter()
        .map(|row| materialize_row(&columns, row, shape))
        .collect()
}

/// Materializes one row.
///
/// # Errors
///
/// Returns [`QueryError::Coercion`] if a column value cannot be converted
/// into its field's type.
pub fn materialize_row(
    columns: &[ColumnMeta],
    row: Vec<SqlValue>,
    shape: &RecordShape,
) -> Result<Record, QueryError> {
    let mut record = shape.empty_record();
    for (column, cell) in columns.iter().zip(row) {
        let Some(field) = shape.field(&column.name) else {
            tracing::debug!(
                "Ignored column {} in result, it does not exist in the record shape",
                column.name
            );
            continue;
        };
        let value = coerce(field, cell)?;
        record.insert(field.name.clone(), value);
    }
    Ok(record)
}

/// Converts rows without a target shape. Column names become field names
/// and values keep their store types, with narrow integers widened and large
/// text decoded.
pub fn materialize_untyped(result: ResultSet) -> Vec<Record> {
    let ResultSet { columns, rows } = result;
    rows.into_iter()
        .map(|row| {
            columns
                .iter()
                .zip(row)
                .map(|(column, cell)| (column.name.clone(), cell.into_value()))
                .collect::<Record>()
        })
        .collect()
}

/// Reads the first column of the first row as an integer, e.g. for
/// `COUNT(*)`.
pub fn scalar_i64(result: &ResultSet) -> Option<i64> {
    let cell = result.rows.first()?.first()?.clone();
    cell.into_value().as_i64()
}

/// Coerces a column value into a field of the given type.
///
/// # Errors
///
/// Returns [`QueryError::Coercion`] if no conversion applies.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn coerce(field: &FieldSpec, cell: SqlValue) -> Result<Value, QueryError> {
    let value = cell.into_value();
    let coerced = match (field.field_type, &value) {
        (_, Value::Null) => Some(Value::Null),

        (FieldType::BigInt, Value::Timestamp(ts)) => Some(Value::BigInt(ts.timestamp_millis())),
        (FieldType::Double, Value::Timestamp(ts)) => {
            Some(Value::Double(ts.timestamp_millis() as f64 / 1000.0))
        }
        (FieldType::Timestamp, value) => timestamp::to_date_time(&field.name, value)
            .ok()
            .map(Value::Timestamp),

        (FieldType::Bool, Value::Bool(b)) => Some(Value::Bool(*b)),
        (FieldType::Bool, value) => value.as_i64().map(|n| Value::Bool(n != 0)),

        (FieldType::Int, value) => value
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .map(Value::Int),
        (FieldType::BigInt, value) => value.as_i64().map(Value::BigInt),
        (FieldType::Float, Value::Float(v)) => Some(Value::Float(*v)),
        (FieldType::Float, value) => value.as_f64().map(|v| Value::Float(v as f32)),
        (FieldType::Double, value) => value.as_f64().map(Value::Double),

        (FieldType::String, Value::Text(s)) => Some(Value::Text(s.clone())),
        (FieldType::Binary, Value::Bytes(bytes)) => Some(Value::Bytes(bytes.clone())),
        (FieldType::Binary, Value::Text(s)) => Some(Value::Bytes(s.clone().into_bytes())),

        _ => None,
    };

    coerced.ok_or_else(|| QueryError::Coercion {
        field: field.name.clone(),
        field_type: field.field_type.to_string(),
        value: value.to_string(),
    })
}
