//! Sink cursor: the resumable position in the block stream, and its store.
//!
//! Exactly one cursor is kept per output stream, keyed by the stream's
//! [`StreamId`]. The cursor is read once at startup and written by the
//! orchestrator according to the checkpoint policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SinkError;
use crate::store::{bounded, DocumentStore};
use crate::types::BlockRef;
use crate::value::{Document, Value};

/// Opaque resume token paired with the block it points at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Stream-issued resume token; empty for a seeded cursor.
    pub token: String,
    pub block: BlockRef,
}

impl Cursor {
    pub fn new(token: impl Into<String>, block: BlockRef) -> Self {
        Self {
            token: token.into(),
            block,
        }
    }

    /// A cursor without a token, positioned right after `block_number`.
    pub fn seeded(block_number: u64) -> Self {
        Self {
            token: String::new(),
            block: BlockRef::new("", block_number),
        }
    }

    /// Returns `true` if the cursor carries no stream token.
    pub fn is_blank(&self) -> bool {
        self.token.is_empty()
    }

    pub fn block_number(&self) -> u64 {
        self.block.number
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_blank() {
            write!(f, "blank cursor at {}", self.block)
        } else {
            write!(f, "cursor {} at {}", self.token, self.block)
        }
    }
}

// ─── StreamId ─────────────────────────────────────────────────────────────────

/// Stable identity of an output stream: hex SHA-256 of the output module
/// name and its serialized definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    pub fn from_module(name: &str, definition: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(definition);
        Self(hex::encode(hasher.finalize()))
    }

    /// Use an already computed module hash.
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── CursorStore ──────────────────────────────────────────────────────────────

/// Trait for persisting one cursor per stream.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Load the cursor for `stream`; `SinkError::NotFound` if none was written yet.
    async fn get(&self, stream: &StreamId) -> Result<Cursor, SinkError>;

    /// Insert or overwrite the cursor for `stream`.
    async fn put(&self, stream: &StreamId, cursor: &Cursor) -> Result<(), SinkError>;

    /// Remove the cursor for `stream` (e.g. when resetting a sink).
    async fn delete(&self, stream: &StreamId) -> Result<(), SinkError>;
}

/// Collection holding cursor documents.
pub const CURSOR_COLLECTION: &str = "_cursors";

/// Default deadline for cursor reads and writes.
pub const DEFAULT_CURSOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Cursor store backed by the `_cursors` collection of a document store.
pub struct DocumentCursorStore {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl DocumentCursorStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            timeout: DEFAULT_CURSOR_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn to_document(cursor: &Cursor) -> Result<Document, SinkError> {
        let block_num = i64::try_from(cursor.block.number).map_err(|_| {
            SinkError::Store(format!(
                "block number {} does not fit a stored cursor",
                cursor.block.number
            ))
        })?;
        let mut doc = Document::new();
        doc.insert("cursor".into(), Value::String(cursor.token.clone()));
        doc.insert("block_num".into(), Value::Int(block_num));
        doc.insert("block_id".into(), Value::String(cursor.block.id.clone()));
        Ok(doc)
    }

    fn from_document(stream: &StreamId, doc: &Document) -> Result<Cursor, SinkError> {
        let corrupt = |what: &str| {
            SinkError::Decode(format!("cursor document for stream {stream}: {what}"))
        };
        let token = match doc.get("cursor") {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(corrupt("missing 'cursor'")),
        };
        let number = match doc.get("block_num") {
            Some(Value::Int(n)) if *n >= 0 => *n as u64,
            _ => return Err(corrupt("missing or negative 'block_num'")),
        };
        let id = match doc.get("block_id") {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(corrupt("missing 'block_id'")),
        };
        Ok(Cursor::new(token, BlockRef::new(id, number)))
    }
}

#[async_trait]
impl CursorStore for DocumentCursorStore {
    async fn get(&self, stream: &StreamId) -> Result<Cursor, SinkError> {
        let found = bounded(
            "reading cursor",
            self.timeout,
            self.store.find_by_id(CURSOR_COLLECTION, stream.as_str()),
        )
        .await?;

        match found {
            Some(doc) => Self::from_document(stream, &doc),
            None => Err(SinkError::NotFound {
                collection: CURSOR_COLLECTION.to_string(),
                id: stream.to_string(),
                operation: "read",
            }),
        }
    }

    async fn put(&self, stream: &StreamId, cursor: &Cursor) -> Result<(), SinkError> {
        let doc = Self::to_document(cursor)?;
        let outcome = bounded(
            "writing cursor",
            self.timeout,
            self.store.upsert_by_id(CURSOR_COLLECTION, stream.as_str(), doc),
        )
        .await?;

        if outcome.is_noop() {
            return Err(SinkError::Store(format!(
                "cursor for stream {stream} was neither updated nor inserted"
            )));
        }
        tracing::debug!(stream = %stream, block = cursor.block.number, "cursor written");
        Ok(())
    }

    async fn delete(&self, stream: &StreamId) -> Result<(), SinkError> {
        bounded(
            "deleting cursor",
            self.timeout,
            self.store.delete_by_id(CURSOR_COLLECTION, stream.as_str()),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDocumentStore;

    fn store() -> DocumentCursorStore {
        DocumentCursorStore::new(Arc::new(MemoryDocumentStore::new()))
    }

    #[test]
    fn stream_id_is_stable() {
        let a = StreamId::from_module("db_out", b"definition");
        let b = StreamId::from_module("db_out", b"definition");
        let c = StreamId::from_module("db_out", b"other definition");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn seeded_cursor_is_blank() {
        let cursor = Cursor::seeded(99);
        assert!(cursor.is_blank());
        assert_eq!(cursor.block_number(), 99);
    }

    #[tokio::test]
    async fn missing_cursor_is_not_found() {
        let err = store().get(&StreamId::from_hash("abc")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn put_then_get() {
        let cursors = store();
        let stream = StreamId::from_hash("abc");
        let cursor = Cursor::new("tok-1", BlockRef::new("0xaa", 100));

        cursors.put(&stream, &cursor).await.unwrap();
        assert_eq!(cursors.get(&stream).await.unwrap(), cursor);
    }

    #[tokio::test]
    async fn put_is_idempotent_and_overwrites() {
        let cursors = store();
        let stream = StreamId::from_hash("abc");
        let first = Cursor::new("tok-1", BlockRef::new("0xaa", 100));
        let second = Cursor::new("tok-2", BlockRef::new("0xbb", 101));

        cursors.put(&stream, &first).await.unwrap();
        cursors.put(&stream, &first).await.unwrap();
        assert_eq!(cursors.get(&stream).await.unwrap(), first);

        cursors.put(&stream, &second).await.unwrap();
        assert_eq!(cursors.get(&stream).await.unwrap(), second);
    }

    #[tokio::test]
    async fn block_number_beyond_i64_is_rejected() {
        let cursors = store();
        let stream = StreamId::from_hash("abc");
        cursors.put(&stream, &Cursor::seeded(7)).await.unwrap();

        let huge = Cursor::new("tok", BlockRef::new("0xff", u64::MAX));
        let err = cursors.put(&stream, &huge).await.unwrap_err();
        assert!(matches!(err, SinkError::Store(_)));
        assert_eq!(cursors.get(&stream).await.unwrap(), Cursor::seeded(7));
    }

    #[tokio::test]
    async fn cursors_are_isolated_per_stream() {
        let cursors = store();
        let a = StreamId::from_hash("a");
        let b = StreamId::from_hash("b");
        cursors.put(&a, &Cursor::seeded(10)).await.unwrap();

        assert!(cursors.get(&b).await.unwrap_err().is_not_found());

        cursors.delete(&a).await.unwrap();
        assert!(cursors.get(&a).await.unwrap_err().is_not_found());
    }
}
