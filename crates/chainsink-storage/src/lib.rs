//! chainsink-storage: document store backends for ChainSink.
//!
//! Backends:
//! - [`MemoryDocumentStore`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Every backend implements [`chainsink_core::DocumentStore`], so the cursor
//! store ([`chainsink_core::DocumentCursorStore`]) works on top of any of them.

#[cfg(feature = "memory")]
pub use chainsink_core::store::MemoryDocumentStore;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDocumentStore;
