//! chainsink-core: applies a block stream's database changes to a document
//! store, reorg-safe and resumable.
//!
//! # Architecture
//!
//! ```text
//! BlockStream → Sinker
//!                 ├── ChangeApplier    (schema coercion, create/update/delete)
//!                 ├── CursorStore      (resume position, one per stream)
//!                 ├── CheckpointPolicy (when to persist the cursor)
//!                 ├── UndoBuffer       (inverse ops for reorg reversal)
//!                 ├── Shutter          (idempotent shutdown)
//!                 └── DocumentStore    (memory / SQLite)
//! ```

pub mod applier;
pub mod builder;
pub mod checkpoint;
pub mod coerce;
pub mod config;
pub mod cursor;
pub mod error;
pub mod metrics;
pub mod schema;
pub mod shutdown;
pub mod sinker;
pub mod store;
pub mod stream;
pub mod types;
pub mod undo;
pub mod value;

pub use applier::ChangeApplier;
pub use builder::SinkBuilder;
pub use checkpoint::{CheckpointPolicy, LivenessChecker};
pub use config::{BlockRange, SinkConfig};
pub use cursor::{Cursor, CursorStore, DocumentCursorStore, StreamId};
pub use error::SinkError;
pub use metrics::{CountingMetrics, NoopMetrics, SinkMetrics};
pub use schema::{FieldType, SchemaRegistry};
pub use shutdown::{ShutdownCause, Shutter};
pub use sinker::{SinkState, Sinker};
pub use store::{DocumentStore, MemoryDocumentStore, WriteOutcome};
pub use stream::{BlockStream, JsonLinesStream, ReplayStream};
pub use types::{BlockRef, BlockStep, Clock, DatabaseChanges, Field, ModuleOutput, Operation, TableChange};
pub use undo::UndoBuffer;
pub use value::{Document, Value};
