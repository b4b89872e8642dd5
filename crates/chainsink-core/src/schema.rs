//! Schema registry: declared field types per collection.
//!
//! The schema file maps collection name → field name → type name:
//!
//! ```json
//! { "users": { "age": "integer", "joined_at": "timestamp", "deleted_at": "null" } }
//! ```
//!
//! Fields that are not declared are stored as plain strings.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::coerce::coerce;
use crate::error::SinkError;
use crate::value::Value;

/// Declared type of a document field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Double,
    Boolean,
    /// Seconds since the Unix epoch.
    Timestamp,
    /// RFC3339 date-time.
    Date,
    /// Must be the empty string; stored as null.
    Null,
    String,
}

impl FieldType {
    /// Resolve a schema type name. Unknown names return `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "integer" => Some(Self::Integer),
            "double" => Some(Self::Double),
            "boolean" => Some(Self::Boolean),
            "timestamp" => Some(Self::Timestamp),
            "date" => Some(Self::Date),
            "null" => Some(Self::Null),
            "string" => Some(Self::String),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Date => "date",
            Self::Null => "null",
            Self::String => "string",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable collection → field → type lookup, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: HashMap<String, HashMap<String, FieldType>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a schema from its JSON representation.
    ///
    /// Unknown type names fall back to `string` so that the value is stored
    /// as received.
    pub fn from_json(json: &str) -> Result<Self, SinkError> {
        let raw: HashMap<String, HashMap<String, String>> = serde_json::from_str(json)
            .map_err(|e| SinkError::Configuration(format!("invalid schema: {e}")))?;

        let mut tables = HashMap::with_capacity(raw.len());
        for (collection, fields) in raw {
            let mut typed = HashMap::with_capacity(fields.len());
            for (field, type_name) in fields {
                let field_type = FieldType::from_name(&type_name).unwrap_or_else(|| {
                    tracing::warn!(
                        collection = %collection,
                        field = %field,
                        type_name = %type_name,
                        "Unknown field type, storing as string"
                    );
                    FieldType::String
                });
                typed.insert(field, field_type);
            }
            tables.insert(collection, typed);
        }
        Ok(Self { tables })
    }

    /// Read and parse a schema file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SinkError::Configuration(format!("reading schema file {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    /// Declare a field type (builder style, mostly for tests and embedding).
    pub fn with_field(
        mut self,
        collection: impl Into<String>,
        field: impl Into<String>,
        field_type: FieldType,
    ) -> Self {
        self.tables
            .entry(collection.into())
            .or_default()
            .insert(field.into(), field_type);
        self
    }

    /// The declared type of `collection.field`, if any.
    pub fn field_type(&self, collection: &str, field: &str) -> Option<FieldType> {
        self.tables.get(collection)?.get(field).copied()
    }

    /// Number of collections with at least one declared field.
    pub fn collection_count(&self) -> usize {
        self.tables.len()
    }

    /// Convert a raw field value according to its declared type.
    pub fn coerce(&self, collection: &str, field: &str, raw: &str) -> Result<Value, SinkError> {
        let Some(field_type) = self.field_type(collection, field) else {
            return Ok(Value::String(raw.to_string()));
        };
        coerce(field_type, raw).map_err(|e| SinkError::Parse {
            collection: collection.to_string(),
            field: field.to_string(),
            field_type,
            value: raw.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "users": { "age": "integer", "name": "string", "score": "double" },
        "tokens": { "burned_at": "null", "symbol": "varchar" }
    }"#;

    #[test]
    fn loads_declared_types() {
        let schema = SchemaRegistry::from_json(SCHEMA).unwrap();
        assert_eq!(schema.collection_count(), 2);
        assert_eq!(schema.field_type("users", "age"), Some(FieldType::Integer));
        assert_eq!(schema.field_type("users", "score"), Some(FieldType::Double));
        assert_eq!(schema.field_type("tokens", "burned_at"), Some(FieldType::Null));
        assert_eq!(schema.field_type("users", "email"), None);
        assert_eq!(schema.field_type("orders", "id"), None);
    }

    #[test]
    fn unknown_type_name_is_string() {
        let schema = SchemaRegistry::from_json(SCHEMA).unwrap();
        assert_eq!(schema.field_type("tokens", "symbol"), Some(FieldType::String));
    }

    #[test]
    fn invalid_json_is_configuration_error() {
        let err = SchemaRegistry::from_json("{\"users\": [1, 2]}").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn undeclared_field_passes_through() {
        let schema = SchemaRegistry::from_json(SCHEMA).unwrap();
        assert_eq!(
            schema.coerce("users", "email", "a@b.c").unwrap(),
            Value::String("a@b.c".into())
        );
        assert_eq!(
            schema.coerce("orders", "total", "12").unwrap(),
            Value::String("12".into())
        );
    }

    #[test]
    fn coerce_reports_field_context() {
        let schema = SchemaRegistry::new().with_field("users", "age", FieldType::Integer);
        assert_eq!(schema.coerce("users", "age", "30").unwrap(), Value::Int(30));

        match schema.coerce("users", "age", "thirty").unwrap_err() {
            SinkError::Parse { collection, field, field_type, value, .. } => {
                assert_eq!(collection, "users");
                assert_eq!(field, "age");
                assert_eq!(field_type, FieldType::Integer);
                assert_eq!(value, "thirty");
            }
            other => panic!("expected Parse, got {other:?}"),
        }
    }
}
