//! Conversions between SQLite values and JSON row cells.

use rusqlite::types::ValueRef;
use serde_json::{Map, Number, Value};

pub use rusqlite::types::Value as SqlValue;

/// An application-visible row: column name to cell value.
pub type Row = Map<String, Value>;

/// Converts a cell read from SQLite into JSON.
///
/// Text that is not valid UTF-8 is decoded lossily; blobs become arrays of
/// byte values.
pub(crate) fn json_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

/// Converts a JSON cell into a value SQLite can bind.
///
/// Booleans are stored as 0/1. Arrays and objects are stored as JSON text.
pub(crate) fn sql_from_json(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}
