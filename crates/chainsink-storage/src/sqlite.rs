//! SQLite document store for ChainSink.
//!
//! Every collection lives in one `documents` table keyed by
//! `(collection, id)`; the document body is stored as JSON text. Uses `sqlx`
//! with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use chainsink_storage::sqlite::SqliteDocumentStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteDocumentStore::open("./sink.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteDocumentStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use chainsink_core::error::SinkError;
use chainsink_core::store::{merge_fields, DocumentStore, WriteOutcome};
use chainsink_core::value::{document_from_json, document_to_json, Document};

fn store_err(e: impl std::fmt::Display) -> SinkError {
    SinkError::Store(e.to_string())
}

/// SQLite-backed document store.
pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./sink.db"`) or a full
    /// SQLite URL (`"sqlite:./sink.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, SinkError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(store_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, SinkError> {
        // Each connection would get its own private in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(store_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create the documents table and enable WAL mode.
    async fn init_schema(&self) -> Result<(), SinkError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT    NOT NULL,
                id         TEXT    NOT NULL,
                body       TEXT    NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    /// Number of documents in `collection`.
    pub async fn count(&self, collection: &str) -> Result<u64, SinkError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM documents WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }

    /// Names of all collections holding at least one document.
    pub async fn collections(&self) -> Result<Vec<String>, SinkError> {
        let rows = sqlx::query("SELECT DISTINCT collection FROM documents ORDER BY collection")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.iter().map(|r| r.get::<String, _>("collection")).collect())
    }

    async fn load(
        tx: &mut Transaction<'_, Sqlite>,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, SinkError> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(store_err)?;

        row.map(|r| decode_body(&r.get::<String, _>("body"))).transpose()
    }

    async fn save(
        tx: &mut Transaction<'_, Sqlite>,
        collection: &str,
        id: &str,
        doc: &Document,
    ) -> Result<(), SinkError> {
        let body = serde_json::to_string(&document_to_json(doc)).map_err(store_err)?;
        sqlx::query(
            "INSERT OR REPLACE INTO documents (collection, id, body, updated_at)
             VALUES (?, ?, ?, strftime('%s', 'now'))",
        )
        .bind(collection)
        .bind(id)
        .bind(&body)
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}

fn decode_body(body: &str) -> Result<Document, SinkError> {
    let json: serde_json::Value = serde_json::from_str(body).map_err(store_err)?;
    document_from_json(json)
}

// ─── DocumentStore impl ──────────────────────────────────────────────────────

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn upsert_by_id(
        &self,
        collection: &str,
        id: &str,
        doc: Document,
    ) -> Result<WriteOutcome, SinkError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let outcome = match Self::load(&mut tx, collection, id).await? {
            Some(mut existing) => {
                let modified = merge_fields(&mut existing, doc);
                if modified {
                    Self::save(&mut tx, collection, id, &existing).await?;
                }
                WriteOutcome {
                    matched: 1,
                    modified: modified as u64,
                    upserted: 0,
                }
            }
            None => {
                Self::save(&mut tx, collection, id, &doc).await?;
                WriteOutcome {
                    matched: 0,
                    modified: 0,
                    upserted: 1,
                }
            }
        };

        tx.commit().await.map_err(store_err)?;
        debug!(collection, id, ?outcome, "document upserted");
        Ok(outcome)
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<WriteOutcome, SinkError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let outcome = match Self::load(&mut tx, collection, id).await? {
            Some(mut existing) => {
                let modified = merge_fields(&mut existing, fields);
                if modified {
                    Self::save(&mut tx, collection, id, &existing).await?;
                }
                WriteOutcome {
                    matched: 1,
                    modified: modified as u64,
                    upserted: 0,
                }
            }
            None => WriteOutcome::default(),
        };

        tx.commit().await.map_err(store_err)?;
        Ok(outcome)
    }

    async fn delete_by_id(&self, collection: &str, id: &str) -> Result<u64, SinkError> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        Ok(result.rows_affected())
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>, SinkError> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;

        row.map(|r| decode_body(&r.get::<String, _>("body"))).transpose()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
