//! Type coercion: turn raw string field values into typed document values.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::schema::FieldType;
use crate::value::Value;

/// Why a raw value could not be converted to its declared type.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoerceError {
    #[error("{0}")]
    Integer(#[from] std::num::ParseIntError),

    #[error("{0}")]
    Double(#[from] std::num::ParseFloatError),

    #[error("non-finite double {0:?} has no stored form")]
    NonFinite(String),

    #[error("invalid boolean literal")]
    Boolean,

    #[error("timestamp out of range")]
    TimestampRange,

    #[error("{0}")]
    Date(#[from] chrono::ParseError),

    #[error("expected an empty value")]
    NotNull,
}

/// Convert `raw` according to `field_type`.
///
/// Pure and deterministic: the same input always yields the same output.
pub fn coerce(field_type: FieldType, raw: &str) -> Result<Value, CoerceError> {
    match field_type {
        FieldType::Integer => Ok(Value::Int(raw.parse::<i64>()?)),
        FieldType::Double => {
            let d = raw.parse::<f64>()?;
            if !d.is_finite() {
                return Err(CoerceError::NonFinite(raw.to_string()));
            }
            Ok(Value::Double(d))
        }
        FieldType::Boolean => parse_bool(raw).map(Value::Bool),
        FieldType::Timestamp => {
            let secs = raw.parse::<i64>()?;
            DateTime::<Utc>::from_timestamp(secs, 0)
                .map(Value::DateTime)
                .ok_or(CoerceError::TimestampRange)
        }
        FieldType::Date => {
            let parsed = DateTime::parse_from_rfc3339(raw)?;
            Ok(Value::DateTime(parsed.with_timezone(&Utc)))
        }
        FieldType::Null if raw.is_empty() => Ok(Value::Null),
        FieldType::Null => Err(CoerceError::NotNull),
        FieldType::String => Ok(Value::String(raw.to_string())),
    }
}

/// Boolean literals emitted by the upstream pipeline.
fn parse_bool(raw: &str) -> Result<bool, CoerceError> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        _ => Err(CoerceError::Boolean),
    }
}
