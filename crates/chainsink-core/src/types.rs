//! Shared types for the sink pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;

// ─── BlockRef / Clock ─────────────────────────────────────────────────────────

/// A reference to a block: its id (hash) and number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub id: String,
    pub number: u64,
}

impl BlockRef {
    pub fn new(id: impl Into<String>, number: u64) -> Self {
        Self {
            id: id.into(),
            number,
        }
    }
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.id.is_empty() {
            write!(f, "#{}", self.number)
        } else {
            write!(f, "#{} ({})", self.number, self.id)
        }
    }
}

/// The block a step's data belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    pub id: String,
    pub number: u64,
    /// Block production time, when the stream provides it.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Clock {
    pub fn new(id: impl Into<String>, number: u64) -> Self {
        Self {
            id: id.into(),
            number,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn block_ref(&self) -> BlockRef {
        BlockRef::new(self.id.clone(), self.number)
    }
}

// ─── Database changes ─────────────────────────────────────────────────────────

/// Mutation requested by a table change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// No-op sentinel.
    #[default]
    Unset,
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unset => write!(f, "unset"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// One field delta: the field name and its new raw value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub new_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, new_value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            new_value: new_value.into(),
            old_value: None,
        }
    }
}

/// A single entity mutation within a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChange {
    /// Target collection.
    pub table: String,
    /// Primary key of the document.
    pub pk: String,
    #[serde(default)]
    pub operation: Operation,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl TableChange {
    pub fn create(table: impl Into<String>, pk: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            table: table.into(),
            pk: pk.into(),
            operation: Operation::Create,
            fields,
        }
    }

    pub fn update(table: impl Into<String>, pk: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            table: table.into(),
            pk: pk.into(),
            operation: Operation::Update,
            fields,
        }
    }

    pub fn delete(table: impl Into<String>, pk: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            pk: pk.into(),
            operation: Operation::Delete,
            fields: vec![],
        }
    }
}

/// All table changes emitted for one block, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseChanges {
    #[serde(default)]
    pub table_changes: Vec<TableChange>,
}

impl DatabaseChanges {
    pub fn new(table_changes: Vec<TableChange>) -> Self {
        Self { table_changes }
    }

    /// Decode the serialized payload of a module output.
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Serialize into a module output payload.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn is_empty(&self) -> bool {
        self.table_changes.is_empty()
    }
}

// ─── Block steps ──────────────────────────────────────────────────────────────

/// The serialized output of one stream module for a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOutput {
    pub name: String,
    pub payload: Vec<u8>,
}

impl ModuleOutput {
    /// Serialize `changes` as the output of module `name`.
    pub fn new(
        name: impl Into<String>,
        changes: &DatabaseChanges,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            name: name.into(),
            payload: changes.encode()?,
        })
    }
}

/// Kind of a block step, as requested from / announced by the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    New,
    Undo,
    Irreversible,
}

/// One unit of stream progress. Steps are processed strictly in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStep {
    /// New block data to apply.
    New {
        cursor: Cursor,
        clock: Clock,
        outputs: Vec<ModuleOutput>,
    },
    /// Chain reorganization: revert everything after `last_valid_block`.
    Undo {
        cursor: Cursor,
        last_valid_block: BlockRef,
    },
    /// Finality marker: `clock` and everything before it is irreversible.
    Irreversible { cursor: Cursor, clock: Clock },
}

impl BlockStep {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::New { .. } => StepKind::New,
            Self::Undo { .. } => StepKind::Undo,
            Self::Irreversible { .. } => StepKind::Irreversible,
        }
    }

    pub fn cursor(&self) -> &Cursor {
        match self {
            Self::New { cursor, .. } | Self::Undo { cursor, .. } | Self::Irreversible { cursor, .. } => {
                cursor
            }
        }
    }

    /// Block number the step refers to.
    pub fn block_number(&self) -> u64 {
        match self {
            Self::New { clock, .. } | Self::Irreversible { clock, .. } => clock.number,
            Self::Undo { last_valid_block, .. } => last_valid_block.number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_changes_json_shape() {
        let json = r#"{
            "table_changes": [
                { "table": "users", "pk": "u1", "operation": "create",
                  "fields": [ { "name": "name", "new_value": "Alice" } ] },
                { "table": "users", "pk": "u2", "operation": "delete" }
            ]
        }"#;
        let changes = DatabaseChanges::decode(json.as_bytes()).unwrap();
        assert_eq!(changes.table_changes.len(), 2);
        assert_eq!(changes.table_changes[0].operation, Operation::Create);
        assert_eq!(changes.table_changes[0].fields[0], Field::new("name", "Alice"));
        assert!(changes.table_changes[1].fields.is_empty());
    }

    #[test]
    fn missing_operation_is_unset() {
        let json = r#"{ "table_changes": [ { "table": "t", "pk": "1" } ] }"#;
        let changes = DatabaseChanges::decode(json.as_bytes()).unwrap();
        assert_eq!(changes.table_changes[0].operation, Operation::Unset);
    }

    #[test]
    fn payload_encode_decode() {
        let changes = DatabaseChanges::new(vec![TableChange::delete("users", "u1")]);
        let output = ModuleOutput::new("db_out", &changes).unwrap();
        assert_eq!(DatabaseChanges::decode(&output.payload).unwrap(), changes);
    }

    #[test]
    fn block_ref_display() {
        assert_eq!(BlockRef::new("", 99).to_string(), "#99");
        assert_eq!(BlockRef::new("0xab", 100).to_string(), "#100 (0xab)");
    }
}
