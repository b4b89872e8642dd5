//! Error types for the chainsink pipeline.

use thiserror::Error;

use crate::schema::FieldType;

/// Errors that can occur while sinking database changes.
///
/// Every variant is fatal to a run: the orchestrator shuts down without
/// persisting the cursor, and recovery is a restart from the last checkpoint.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cannot parse {field_type} field '{collection}.{field}' from {value:?}: {reason}")]
    Parse {
        collection: String,
        field: String,
        field_type: FieldType,
        value: String,
        reason: String,
    },

    #[error("No document '{id}' in '{collection}' to {operation}")]
    NotFound {
        collection: String,
        id: String,
        operation: &'static str,
    },

    #[error("Storage error: {0}")]
    Store(String),

    #[error("{operation} timed out after {ms}ms")]
    Timeout { operation: String, ms: u64 },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error(
        "Cannot undo back to block {fork_block}: oldest revertible block is {oldest_revertible}"
    )]
    UndoUnavailable { fork_block: u64, oldest_revertible: u64 },

    #[error("Applying {collection}/{pk} at block {block_number} ({block_id}): {source}")]
    Change {
        collection: String,
        pk: String,
        block_number: u64,
        block_id: String,
        #[source]
        source: Box<SinkError>,
    },
}

impl SinkError {
    /// The underlying error, looking through any per-change context.
    pub fn root(&self) -> &SinkError {
        match self {
            Self::Change { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns `true` if the store reported no matching document.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound { .. })
    }

    /// Returns `true` if a field value failed type coercion.
    pub fn is_parse(&self) -> bool {
        matches!(self.root(), Self::Parse { .. })
    }

    /// Returns `true` if the sink refused to run because of its configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(self.root(), Self::Configuration(_))
    }

    /// Returns `true` if a store call exceeded its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_looks_through_change_context() {
        let err = SinkError::Change {
            collection: "users".into(),
            pk: "u1".into(),
            block_number: 10,
            block_id: "0xa".into(),
            source: Box::new(SinkError::NotFound {
                collection: "users".into(),
                id: "u1".into(),
                operation: "update",
            }),
        };
        assert!(err.is_not_found());
        assert!(!err.is_parse());
        assert!(err.to_string().contains("block 10"));
    }

    #[test]
    fn parse_error_display() {
        let err = SinkError::Parse {
            collection: "users".into(),
            field: "age".into(),
            field_type: FieldType::Integer,
            value: "abc".into(),
            reason: "invalid digit found in string".into(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot parse integer field 'users.age' from \"abc\": invalid digit found in string"
        );
    }
}
