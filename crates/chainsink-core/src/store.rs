//! Document store capability interface.
//!
//! The sink only needs four operations per named collection: upsert by id,
//! partial update by id, delete by id and find by id. Backends report
//! "no matching document" through their return values (`WriteOutcome`,
//! deleted count, `None`) and reserve `Err` for storage failures.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::value::Document;

/// Counts reported by an upsert or partial update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Documents that matched the id.
    pub matched: u64,
    /// Matched documents whose content actually changed.
    pub modified: u64,
    /// Documents inserted because none matched.
    pub upserted: u64,
}

impl WriteOutcome {
    /// Returns `true` if the write neither found nor created a document.
    pub fn is_noop(&self) -> bool {
        self.matched == 0 && self.upserted == 0
    }
}

/// Trait for document stores the sink writes to.
///
/// Implementations include `MemoryDocumentStore` and the SQLite store in
/// `chainsink-storage`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Merge `doc` into the document with `id`, creating it if absent.
    async fn upsert_by_id(
        &self,
        collection: &str,
        id: &str,
        doc: Document,
    ) -> Result<WriteOutcome, SinkError>;

    /// Merge `fields` into the existing document with `id`. Never creates.
    async fn update_by_id(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<WriteOutcome, SinkError>;

    /// Delete the document with `id`; returns how many documents were removed.
    async fn delete_by_id(&self, collection: &str, id: &str) -> Result<u64, SinkError>;

    /// Fetch the document with `id`.
    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>, SinkError>;
}

/// Run a store call under a deadline, turning an elapsed deadline into
/// `SinkError::Timeout`.
pub async fn bounded<T, F>(operation: &str, limit: Duration, call: F) -> Result<T, SinkError>
where
    F: Future<Output = Result<T, SinkError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(SinkError::Timeout {
            operation: operation.to_string(),
            ms: limit.as_millis() as u64,
        }),
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory document store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, HashMap<String, Document>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a document, for assertions.
    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }
}

/// Apply `fields` on top of `doc`; returns `true` if anything changed.
pub fn merge_fields(doc: &mut Document, fields: Document) -> bool {
    let mut changed = false;
    for (name, value) in fields {
        if doc.get(&name) != Some(&value) {
            doc.insert(name, value);
            changed = true;
        }
    }
    changed
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn upsert_by_id(
        &self,
        collection: &str,
        id: &str,
        doc: Document,
    ) -> Result<WriteOutcome, SinkError> {
        let mut collections = self.collections.lock().unwrap();
        let docs = collections.entry(collection.to_string()).or_default();
        match docs.get_mut(id) {
            Some(existing) => {
                let modified = merge_fields(existing, doc) as u64;
                Ok(WriteOutcome {
                    matched: 1,
                    modified,
                    upserted: 0,
                })
            }
            None => {
                docs.insert(id.to_string(), doc);
                Ok(WriteOutcome {
                    matched: 0,
                    modified: 0,
                    upserted: 1,
                })
            }
        }
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<WriteOutcome, SinkError> {
        let mut collections = self.collections.lock().unwrap();
        let existing = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id));
        Ok(match existing {
            Some(doc) => WriteOutcome {
                matched: 1,
                modified: merge_fields(doc, fields) as u64,
                upserted: 0,
            },
            None => WriteOutcome::default(),
        })
    }

    async fn delete_by_id(&self, collection: &str, id: &str) -> Result<u64, SinkError> {
        let mut collections = self.collections.lock().unwrap();
        let removed = collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        Ok(removed as u64)
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>, SinkError> {
        Ok(self.get(collection, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn doc(fields: &[(&str, Value)]) -> Document {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn upsert_inserts_then_merges() {
        let store = MemoryDocumentStore::new();
        let first = store
            .upsert_by_id("users", "u1", doc(&[("name", "Alice".into())]))
            .await
            .unwrap();
        assert_eq!(first.upserted, 1);

        let second = store
            .upsert_by_id("users", "u1", doc(&[("age", Value::Int(30))]))
            .await
            .unwrap();
        assert_eq!(second, WriteOutcome { matched: 1, modified: 1, upserted: 0 });

        let stored = store.get("users", "u1").unwrap();
        assert_eq!(stored.get("name"), Some(&Value::from("Alice")));
        assert_eq!(stored.get("age"), Some(&Value::Int(30)));
    }

    #[tokio::test]
    async fn update_missing_is_noop_outcome() {
        let store = MemoryDocumentStore::new();
        let outcome = store
            .update_by_id("users", "nobody", doc(&[("age", Value::Int(1))]))
            .await
            .unwrap();
        assert!(outcome.is_noop());
        assert_eq!(store.count("users"), 0);
    }

    #[tokio::test]
    async fn delete_reports_count() {
        let store = MemoryDocumentStore::new();
        store.upsert_by_id("users", "u1", Document::new()).await.unwrap();
        assert_eq!(store.delete_by_id("users", "u1").await.unwrap(), 1);
        assert_eq!(store.delete_by_id("users", "u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bounded_times_out() {
        let result: Result<(), SinkError> = bounded("slow call", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        match result {
            Err(SinkError::Timeout { operation, ms }) => {
                assert_eq!(operation, "slow call");
                assert_eq!(ms, 10);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
