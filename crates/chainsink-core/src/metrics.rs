//! Observability hooks injected into the applier and the orchestrator.
//!
//! `chainsink-observability` provides an OpenTelemetry implementation; this
//! module holds the trait, a no-op and an in-process counter used in tests.

use std::sync::Mutex;
use std::time::Duration;

/// Sink observability collaborator.
pub trait SinkMetrics: Send + Sync {
    /// One block's changes were written to the store.
    fn record_flush(&self, changes: u64, elapsed: Duration);

    /// The cursor was persisted at `block_number`.
    fn record_cursor_write(&self, block_number: u64);

    /// A reorg reverted `blocks` blocks.
    fn record_undo(&self, blocks: u64);

    /// Latest block number seen by the sink.
    fn record_head(&self, block_number: u64);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl SinkMetrics for NoopMetrics {
    fn record_flush(&self, _changes: u64, _elapsed: Duration) {}
    fn record_cursor_write(&self, _block_number: u64) {}
    fn record_undo(&self, _blocks: u64) {}
    fn record_head(&self, _block_number: u64) {}
}

/// Snapshot of [`CountingMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub flush_count: u64,
    pub changes_applied: u64,
    pub flush_duration: Duration,
    pub cursor_writes: u64,
    pub last_cursor_block: Option<u64>,
    pub blocks_reverted: u64,
    pub head_block: Option<u64>,
}

/// Keeps running totals in memory.
#[derive(Debug, Default)]
pub struct CountingMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().unwrap().clone()
    }
}

impl SinkMetrics for CountingMetrics {
    fn record_flush(&self, changes: u64, elapsed: Duration) {
        let mut m = self.inner.lock().unwrap();
        m.flush_count += 1;
        m.changes_applied += changes;
        m.flush_duration += elapsed;
    }

    fn record_cursor_write(&self, block_number: u64) {
        let mut m = self.inner.lock().unwrap();
        m.cursor_writes += 1;
        m.last_cursor_block = Some(block_number);
    }

    fn record_undo(&self, blocks: u64) {
        self.inner.lock().unwrap().blocks_reverted += blocks;
    }

    fn record_head(&self, block_number: u64) {
        self.inner.lock().unwrap().head_block = Some(block_number);
    }
}
