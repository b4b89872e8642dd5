//! Change applier: turns one block's table changes into document mutations.
//!
//! Changes are applied strictly in order and independently (no transaction
//! spans a block). The first failure stops the block and is returned to the
//! orchestrator, which then refuses to move the cursor past this block.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::SinkError;
use crate::metrics::SinkMetrics;
use crate::schema::SchemaRegistry;
use crate::store::{bounded, DocumentStore};
use crate::types::{Clock, DatabaseChanges, Operation, TableChange};
use crate::undo::{BufferedBlock, InverseOp};
use crate::value::Document;

/// Default deadline for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

/// Applies `DatabaseChanges` to a document store.
pub struct ChangeApplier {
    store: Arc<dyn DocumentStore>,
    schema: Arc<SchemaRegistry>,
    metrics: Arc<dyn SinkMetrics>,
    timeout: Duration,
    /// Read each document before mutating it so the change can be undone.
    record_inverse: bool,
}

impl ChangeApplier {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        schema: Arc<SchemaRegistry>,
        metrics: Arc<dyn SinkMetrics>,
    ) -> Self {
        Self {
            store,
            schema,
            metrics,
            timeout: DEFAULT_STORE_TIMEOUT,
            record_inverse: false,
        }
    }

    /// Set the per-call store deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Record inverse operations for every mutation (needed for reorg undo).
    pub fn recording_inverse(mut self, enabled: bool) -> Self {
        self.record_inverse = enabled;
        self
    }

    /// Apply every change of a block, in order.
    ///
    /// Returns the block with the inverse operations recorded so far (empty
    /// unless inverse recording is enabled).
    pub async fn apply(
        &self,
        clock: &Clock,
        changes: &DatabaseChanges,
    ) -> Result<BufferedBlock, SinkError> {
        let started = Instant::now();
        let mut inverse = Vec::new();
        let mut applied = 0u64;

        for change in &changes.table_changes {
            self.apply_change(change, &mut inverse)
                .await
                .map_err(|e| SinkError::Change {
                    collection: change.table.clone(),
                    pk: change.pk.clone(),
                    block_number: clock.number,
                    block_id: clock.id.clone(),
                    source: Box::new(e),
                })?;
            if change.operation != Operation::Unset {
                applied += 1;
            }
        }

        if applied > 0 {
            let elapsed = started.elapsed();
            self.metrics.record_flush(applied, elapsed);
            tracing::debug!(
                block = clock.number,
                changes = applied,
                elapsed_ms = elapsed.as_millis() as u64,
                "block changes applied"
            );
        }

        Ok(BufferedBlock {
            block: clock.block_ref(),
            inverse,
        })
    }

    async fn apply_change(
        &self,
        change: &TableChange,
        inverse: &mut Vec<InverseOp>,
    ) -> Result<(), SinkError> {
        match change.operation {
            Operation::Unset => Ok(()),
            Operation::Create => {
                let doc = self.build_document(change)?;
                self.remember(change, inverse).await?;
                let outcome = bounded(
                    "saving document",
                    self.timeout,
                    self.store.upsert_by_id(&change.table, &change.pk, doc),
                )
                .await?;
                // Matching an existing document is fine: creation is an upsert.
                if outcome.is_noop() {
                    return Err(SinkError::Store(format!(
                        "no document written for {}/{}",
                        change.table, change.pk
                    )));
                }
                Ok(())
            }
            Operation::Update => {
                let fields = self.build_document(change)?;
                self.remember(change, inverse).await?;
                let outcome = bounded(
                    "updating document",
                    self.timeout,
                    self.store.update_by_id(&change.table, &change.pk, fields),
                )
                .await?;
                if outcome.is_noop() {
                    return Err(self.not_found(change, "update"));
                }
                Ok(())
            }
            Operation::Delete => {
                self.remember(change, inverse).await?;
                let deleted = bounded(
                    "deleting document",
                    self.timeout,
                    self.store.delete_by_id(&change.table, &change.pk),
                )
                .await?;
                if deleted == 0 {
                    return Err(self.not_found(change, "delete"));
                }
                Ok(())
            }
        }
    }

    /// Revert buffered blocks (newest first), replaying their inverse
    /// operations in reverse application order.
    pub async fn revert(&self, blocks: &[BufferedBlock]) -> Result<(), SinkError> {
        for block in blocks {
            for op in block.inverse.iter().rev() {
                bounded(
                    "reverting document",
                    self.timeout,
                    self.store.delete_by_id(&op.collection, &op.id),
                )
                .await?;
                if let Some(previous) = &op.previous {
                    bounded(
                        "restoring document",
                        self.timeout,
                        self.store
                            .upsert_by_id(&op.collection, &op.id, previous.clone()),
                    )
                    .await?;
                }
            }
            tracing::debug!(block = %block.block, ops = block.inverse.len(), "block reverted");
        }
        Ok(())
    }

    /// Coerce every field delta into a typed document.
    fn build_document(&self, change: &TableChange) -> Result<Document, SinkError> {
        let mut doc = Document::with_capacity(change.fields.len());
        for field in &change.fields {
            let value = self
                .schema
                .coerce(&change.table, &field.name, &field.new_value)?;
            doc.insert(field.name.clone(), value);
        }
        Ok(doc)
    }

    async fn remember(
        &self,
        change: &TableChange,
        inverse: &mut Vec<InverseOp>,
    ) -> Result<(), SinkError> {
        if !self.record_inverse {
            return Ok(());
        }
        let previous = bounded(
            "reading document",
            self.timeout,
            self.store.find_by_id(&change.table, &change.pk),
        )
        .await?;
        inverse.push(InverseOp {
            collection: change.table.clone(),
            id: change.pk.clone(),
            previous,
        });
        Ok(())
    }

    fn not_found(&self, change: &TableChange, operation: &'static str) -> SinkError {
        SinkError::NotFound {
            collection: change.table.clone(),
            id: change.pk.clone(),
            operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{CountingMetrics, NoopMetrics};
    use crate::schema::FieldType;
    use crate::store::MemoryDocumentStore;
    use crate::types::Field;
    use crate::value::Value;

    fn schema() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::from_json(
                r#"{"users": {"age": "integer", "name": "string", "deleted_at": "null"}}"#,
            )
            .unwrap(),
        )
    }

    fn applier(store: Arc<MemoryDocumentStore>) -> ChangeApplier {
        ChangeApplier::new(store, schema(), Arc::new(NoopMetrics))
    }

    fn clock(n: u64) -> Clock {
        Clock::new(format!("0x{n}"), n)
    }

    fn create_alice() -> TableChange {
        TableChange::create(
            "users",
            "u1",
            vec![Field::new("name", "Alice"), Field::new("age", "30")],
        )
    }

    #[tokio::test]
    async fn create_coerces_declared_fields() {
        let store = Arc::new(MemoryDocumentStore::new());
        applier(store.clone())
            .apply(&clock(1), &DatabaseChanges::new(vec![create_alice()]))
            .await
            .unwrap();

        let doc = store.get("users", "u1").unwrap();
        assert_eq!(doc.get("name"), Some(&Value::from("Alice")));
        assert_eq!(doc.get("age"), Some(&Value::Int(30)));
        assert_eq!(doc.len(), 2);
    }

    #[tokio::test]
    async fn create_twice_is_idempotent() {
        let store = Arc::new(MemoryDocumentStore::new());
        let applier = applier(store.clone());
        let changes = DatabaseChanges::new(vec![create_alice()]);

        applier.apply(&clock(1), &changes).await.unwrap();
        let once = store.get("users", "u1");
        applier.apply(&clock(1), &changes).await.unwrap();

        assert_eq!(store.get("users", "u1"), once);
        assert_eq!(store.count("users"), 1);
    }

    #[tokio::test]
    async fn update_coerces_like_create() {
        let store = Arc::new(MemoryDocumentStore::new());
        let applier = applier(store.clone());
        let changes = DatabaseChanges::new(vec![
            create_alice(),
            TableChange::update("users", "u1", vec![Field::new("age", "31")]),
        ]);
        applier.apply(&clock(1), &changes).await.unwrap();

        let doc = store.get("users", "u1").unwrap();
        assert_eq!(doc.get("age"), Some(&Value::Int(31)));
        assert_eq!(doc.get("name"), Some(&Value::from("Alice")));
    }

    #[tokio::test]
    async fn update_missing_document_is_not_found() {
        let store = Arc::new(MemoryDocumentStore::new());
        let changes = DatabaseChanges::new(vec![TableChange::update(
            "users",
            "ghost",
            vec![Field::new("age", "1")],
        )]);
        let err = applier(store).apply(&clock(7), &changes).await.unwrap_err();
        assert!(err.is_not_found());
        match err {
            SinkError::Change { block_number, pk, .. } => {
                assert_eq!(block_number, 7);
                assert_eq!(pk, "ghost");
            }
            other => panic!("expected Change, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_removes_and_reports_missing() {
        let store = Arc::new(MemoryDocumentStore::new());
        let applier = applier(store.clone());
        applier
            .apply(&clock(1), &DatabaseChanges::new(vec![create_alice()]))
            .await
            .unwrap();

        let delete = DatabaseChanges::new(vec![TableChange::delete("users", "u1")]);
        applier.apply(&clock(2), &delete).await.unwrap();
        assert!(store.get("users", "u1").is_none());

        let err = applier.apply(&clock(3), &delete).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn first_failure_aborts_remaining_changes() {
        let store = Arc::new(MemoryDocumentStore::new());
        let changes = DatabaseChanges::new(vec![
            TableChange::create("users", "u1", vec![Field::new("deleted_at", "x")]),
            TableChange::create("users", "u2", vec![Field::new("name", "Bob")]),
        ]);
        let err = applier(store.clone())
            .apply(&clock(1), &changes)
            .await
            .unwrap_err();

        assert!(err.is_parse());
        assert_eq!(store.count("users"), 0);
    }

    #[tokio::test]
    async fn non_finite_double_is_parse_error() {
        let store = Arc::new(MemoryDocumentStore::new());
        let schema = Arc::new(SchemaRegistry::new().with_field("prices", "usd", FieldType::Double));
        let applier = ChangeApplier::new(store.clone(), schema, Arc::new(NoopMetrics));
        let changes = DatabaseChanges::new(vec![TableChange::create(
            "prices",
            "eth",
            vec![Field::new("usd", "NaN")],
        )]);

        let err = applier.apply(&clock(1), &changes).await.unwrap_err();
        assert!(err.is_parse());
        assert_eq!(store.count("prices"), 0);
    }

    #[tokio::test]
    async fn null_field_stores_null() {
        let store = Arc::new(MemoryDocumentStore::new());
        let changes = DatabaseChanges::new(vec![TableChange::create(
            "users",
            "u1",
            vec![Field::new("deleted_at", "")],
        )]);
        applier(store.clone()).apply(&clock(1), &changes).await.unwrap();
        assert_eq!(
            store.get("users", "u1").unwrap().get("deleted_at"),
            Some(&Value::Null)
        );
    }

    #[tokio::test]
    async fn unset_is_noop() {
        let store = Arc::new(MemoryDocumentStore::new());
        let metrics = Arc::new(CountingMetrics::new());
        let applier = ChangeApplier::new(store.clone(), schema(), metrics.clone());
        let changes = DatabaseChanges::new(vec![TableChange {
            table: "users".into(),
            pk: "u1".into(),
            operation: Operation::Unset,
            fields: vec![Field::new("name", "x")],
        }]);
        applier.apply(&clock(1), &changes).await.unwrap();
        assert_eq!(store.count("users"), 0);
        assert_eq!(metrics.snapshot().flush_count, 0);
    }

    #[tokio::test]
    async fn records_flush_metrics() {
        let store = Arc::new(MemoryDocumentStore::new());
        let metrics = Arc::new(CountingMetrics::new());
        let applier = ChangeApplier::new(store, schema(), metrics.clone());
        let changes = DatabaseChanges::new(vec![
            create_alice(),
            TableChange::update("users", "u1", vec![Field::new("name", "Alicia")]),
        ]);
        applier.apply(&clock(1), &changes).await.unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.flush_count, 1);
        assert_eq!(snapshot.changes_applied, 2);
    }

    #[tokio::test]
    async fn revert_restores_previous_state() {
        let store = Arc::new(MemoryDocumentStore::new());
        let applier = applier(store.clone()).recording_inverse(true);

        applier
            .apply(&clock(1), &DatabaseChanges::new(vec![create_alice()]))
            .await
            .unwrap();
        let before = store.get("users", "u1");

        let block = applier
            .apply(
                &clock(2),
                &DatabaseChanges::new(vec![
                    TableChange::update("users", "u1", vec![Field::new("age", "40")]),
                    TableChange::create("users", "u2", vec![Field::new("name", "Bob")]),
                    TableChange::delete("users", "u1"),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(block.inverse.len(), 3);
        assert!(store.get("users", "u1").is_none());

        applier.revert(&[block]).await.unwrap();
        assert_eq!(store.get("users", "u1"), before);
        assert!(store.get("users", "u2").is_none());
    }

    #[tokio::test]
    async fn declared_type_on_other_collection_is_ignored() {
        let store = Arc::new(MemoryDocumentStore::new());
        let schema = Arc::new(SchemaRegistry::new().with_field("users", "age", FieldType::Integer));
        let applier = ChangeApplier::new(store.clone(), schema, Arc::new(NoopMetrics));
        let changes = DatabaseChanges::new(vec![TableChange::create(
            "pets",
            "p1",
            vec![Field::new("age", "3")],
        )]);
        applier.apply(&clock(1), &changes).await.unwrap();
        assert_eq!(
            store.get("pets", "p1").unwrap().get("age"),
            Some(&Value::from("3"))
        );
    }
}
