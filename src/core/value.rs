//! Database value types
//!
//! This module defines the values that flow between record fields and the
//! database: [`DatabaseValue`] for statement arguments and row cells, and
//! [`FromValue`] for decoding a cell back into a typed field.

use super::error::{DatabaseError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Database value that can hold different types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatabaseValue {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// 32-bit floating point
    Float(f32),
    /// 64-bit floating point
    Double(f64),
    /// String value
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Point in time, always UTC
    Timestamp(DateTime<Utc>),
}

impl DatabaseValue {
    /// Get the value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DatabaseValue::Bool(v) => Some(*v),
            DatabaseValue::Int(v) => Some(*v != 0),
            DatabaseValue::Long(v) => Some(*v != 0),
            DatabaseValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Some(true),
                "false" | "f" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Get the value as an i32
    pub fn as_int(&self) -> Option<i32> {
        match self {
            DatabaseValue::Int(v) => Some(*v),
            DatabaseValue::Long(v) => i32::try_from(*v).ok(),
            DatabaseValue::String(s) => s.parse().ok(),
            DatabaseValue::Bool(v) => Some(*v as i32),
            _ => None,
        }
    }

    /// Get the value as an i64
    pub fn as_long(&self) -> Option<i64> {
        match self {
            DatabaseValue::Long(v) => Some(*v),
            DatabaseValue::Int(v) => Some(*v as i64),
            DatabaseValue::String(s) => s.parse().ok(),
            DatabaseValue::Bool(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Get the value as an f64
    pub fn as_double(&self) -> Option<f64> {
        match self {
            DatabaseValue::Double(v) => Some(*v),
            DatabaseValue::Float(v) => Some(*v as f64),
            DatabaseValue::Int(v) => Some(*v as f64),
            DatabaseValue::Long(v) => Some(*v as f64),
            DatabaseValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Get the value as a string slice (String values only)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get the value as a UTC timestamp
    ///
    /// Text cells are accepted in RFC 3339 form and in the
    /// `YYYY-MM-DD HH:MM:SS[.fff]` form SQLite produces.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            DatabaseValue::Timestamp(v) => Some(*v),
            DatabaseValue::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                        .map(|t| t.and_utc())
                        .ok()
                }),
            _ => None,
        }
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            DatabaseValue::Null => "null",
            DatabaseValue::Bool(_) => "bool",
            DatabaseValue::Int(_) => "int",
            DatabaseValue::Long(_) => "long",
            DatabaseValue::Float(_) => "float",
            DatabaseValue::Double(_) => "double",
            DatabaseValue::String(_) => "string",
            DatabaseValue::Bytes(_) => "bytes",
            DatabaseValue::Timestamp(_) => "timestamp",
        }
    }
}

impl std::fmt::Display for DatabaseValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseValue::Null => write!(f, "NULL"),
            DatabaseValue::Bool(v) => write!(f, "{v}"),
            DatabaseValue::Int(v) => write!(f, "{v}"),
            DatabaseValue::Long(v) => write!(f, "{v}"),
            DatabaseValue::Float(v) => write!(f, "{v}"),
            DatabaseValue::Double(v) => write!(f, "{v}"),
            DatabaseValue::String(s) => write!(f, "{s}"),
            DatabaseValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            DatabaseValue::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(v: bool) -> Self {
        DatabaseValue::Bool(v)
    }
}

impl From<i32> for DatabaseValue {
    fn from(v: i32) -> Self {
        DatabaseValue::Int(v)
    }
}

impl From<i64> for DatabaseValue {
    fn from(v: i64) -> Self {
        DatabaseValue::Long(v)
    }
}

impl From<f32> for DatabaseValue {
    fn from(v: f32) -> Self {
        DatabaseValue::Float(v)
    }
}

impl From<f64> for DatabaseValue {
    fn from(v: f64) -> Self {
        DatabaseValue::Double(v)
    }
}

impl From<String> for DatabaseValue {
    fn from(v: String) -> Self {
        DatabaseValue::String(v)
    }
}

impl From<&str> for DatabaseValue {
    fn from(v: &str) -> Self {
        DatabaseValue::String(v.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(v: Vec<u8>) -> Self {
        DatabaseValue::Bytes(v)
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(v: DateTime<Utc>) -> Self {
        DatabaseValue::Timestamp(v)
    }
}

impl<T: Into<DatabaseValue>> From<Option<T>> for DatabaseValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// Decode a row cell into a typed record field
pub trait FromValue: Sized {
    fn from_value(value: DatabaseValue) -> Result<Self>;
}

fn mismatch<T>(expected: &str, value: &DatabaseValue) -> Result<T> {
    Err(DatabaseError::type_mismatch(expected, value.type_name()))
}

impl FromValue for DatabaseValue {
    fn from_value(value: DatabaseValue) -> Result<Self> {
        Ok(value)
    }
}

impl FromValue for bool {
    fn from_value(value: DatabaseValue) -> Result<Self> {
        value.as_bool().map_or_else(|| mismatch("bool", &value), Ok)
    }
}

impl FromValue for i32 {
    fn from_value(value: DatabaseValue) -> Result<Self> {
        value.as_int().map_or_else(|| mismatch("i32", &value), Ok)
    }
}

impl FromValue for i64 {
    fn from_value(value: DatabaseValue) -> Result<Self> {
        value.as_long().map_or_else(|| mismatch("i64", &value), Ok)
    }
}

impl FromValue for f32 {
    fn from_value(value: DatabaseValue) -> Result<Self> {
        value
            .as_double()
            .map(|v| v as f32)
            .map_or_else(|| mismatch("f32", &value), Ok)
    }
}

impl FromValue for f64 {
    fn from_value(value: DatabaseValue) -> Result<Self> {
        value.as_double().map_or_else(|| mismatch("f64", &value), Ok)
    }
}

impl FromValue for String {
    fn from_value(value: DatabaseValue) -> Result<Self> {
        match value {
            DatabaseValue::String(s) => Ok(s),
            other @ (DatabaseValue::Null | DatabaseValue::Bytes(_)) => mismatch("string", &other),
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: DatabaseValue) -> Result<Self> {
        match value {
            DatabaseValue::Bytes(b) => Ok(b),
            DatabaseValue::String(s) => Ok(s.into_bytes()),
            other => mismatch("bytes", &other),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: DatabaseValue) -> Result<Self> {
        value
            .as_timestamp()
            .map_or_else(|| mismatch("timestamp", &value), Ok)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: DatabaseValue) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

/// A row of database results (column name -> value mapping)
pub type DatabaseRow = HashMap<String, DatabaseValue>;

/// Multiple rows returned from a query
pub type DatabaseResult = Vec<DatabaseRow>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_value_conversions() {
        let val = DatabaseValue::Int(42);
        assert_eq!(val.as_int(), Some(42));
        assert_eq!(val.as_long(), Some(42));
        assert_eq!(val.to_string(), "42");

        let val = DatabaseValue::String("123".to_string());
        assert_eq!(val.as_int(), Some(123));

        let val = DatabaseValue::Long(i64::MAX);
        assert_eq!(val.as_int(), None);
    }

    #[test]
    fn test_value_from_types() {
        let val: DatabaseValue = Some(42).into();
        assert_eq!(val, DatabaseValue::Int(42));

        let val: DatabaseValue = Option::<String>::None.into();
        assert_eq!(val, DatabaseValue::Null);
    }

    #[test]
    fn test_decode_fields() {
        assert_eq!(i64::from_value(DatabaseValue::Int(7)).unwrap(), 7);
        assert!(bool::from_value(DatabaseValue::Long(1)).unwrap());
        assert_eq!(
            Option::<i32>::from_value(DatabaseValue::Null).unwrap(),
            None
        );
        assert_eq!(
            Option::<String>::from_value(DatabaseValue::from("x")).unwrap(),
            Some("x".to_string())
        );
        let err = i32::from_value(DatabaseValue::Null).unwrap_err();
        assert!(matches!(err, DatabaseError::TypeMismatch { .. }));
    }

    #[test]
    fn test_decode_timestamp_text() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let rfc = DatabaseValue::from("2024-03-01T12:30:00+00:00");
        assert_eq!(DateTime::<Utc>::from_value(rfc).unwrap(), expected);

        let sqlite = DatabaseValue::from("2024-03-01 12:30:00");
        assert_eq!(DateTime::<Utc>::from_value(sqlite).unwrap(), expected);
    }

    #[test]
    fn test_value_type_name() {
        assert_eq!(DatabaseValue::Null.type_name(), "null");
        assert_eq!(DatabaseValue::Long(42).type_name(), "long");
        assert_eq!(DatabaseValue::Timestamp(Utc::now()).type_name(), "timestamp");
    }
}
