//! # chainsink-observability
//!
//! OpenTelemetry-based observability for ChainSink.
//!
//! ## Built-in metrics
//! - `chainsink.changes_applied`: counter, table changes written
//! - `chainsink.flush_count`: counter, blocks whose changes were written
//! - `chainsink.flush_duration_ms`: histogram
//! - `chainsink.cursor_writes`: counter
//! - `chainsink.blocks_reverted`: counter, blocks undone by reorgs
//! - `chainsink.head_block_number`: observable gauge
//!
//! ## Structured logging
//! JSON-structured or human-readable logs, levels configurable per component.

pub mod metrics;
pub mod tracing_setup;

pub use metrics::OtelSinkMetrics;
pub use tracing_setup::{init_tracing, LogConfig};
