//! Typed document values.

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;

use crate::error::SinkError;

/// A document: field name → typed value, in the order the fields were written.
///
/// The primary key is not part of the document; stores key documents by id.
pub type Document = IndexMap<String, Value>;

/// A typed field value as stored in a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
}

impl Value {
    /// Name of the value's kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::DateTime(_) => "datetime",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Canonical string form. Integers, doubles and booleans render exactly as
/// they parse back.
impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::String(s) => f.write_str(s),
            Self::DateTime(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

// ─── JSON mapping ─────────────────────────────────────────────────────────────

/// Key used to mark a date-time in the JSON form (`{"$date": "<rfc3339>"}`).
const DATE_KEY: &str = "$date";

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            // NaN and infinities have no JSON form.
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(t) => serde_json::json!({
                DATE_KEY: t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
            }),
        }
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = SinkError;

    fn try_from(json: serde_json::Value) -> Result<Self, Self::Error> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::Int(i)),
                None => n
                    .as_f64()
                    .map(Value::Double)
                    .ok_or_else(|| SinkError::Decode(format!("unrepresentable number {n}"))),
            },
            serde_json::Value::String(s) => Ok(Value::String(s)),
            serde_json::Value::Object(map) => {
                let date = map
                    .get(DATE_KEY)
                    .and_then(|v| v.as_str())
                    .filter(|_| map.len() == 1)
                    .ok_or_else(|| SinkError::Decode("nested documents are not supported".into()))?;
                DateTime::parse_from_rfc3339(date)
                    .map(|t| Value::DateTime(t.with_timezone(&Utc)))
                    .map_err(|e| SinkError::Decode(format!("invalid {DATE_KEY} {date:?}: {e}")))
            }
            serde_json::Value::Array(_) => {
                Err(SinkError::Decode("array values are not supported".into()))
            }
        }
    }
}

/// Render a document as a JSON object.
pub fn document_to_json(doc: &Document) -> serde_json::Value {
    serde_json::Value::Object(
        doc.iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
            .collect(),
    )
}

/// Parse a document from a JSON object.
pub fn document_from_json(json: serde_json::Value) -> Result<Document, SinkError> {
    let serde_json::Value::Object(map) = json else {
        return Err(SinkError::Decode("document must be a JSON object".into()));
    };
    map.into_iter()
        .map(|(k, v)| Ok((k, Value::try_from(v)?)))
        .collect()
}
