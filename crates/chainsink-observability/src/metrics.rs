//! ChainSink metrics definitions.
//!
//! All metrics use OpenTelemetry conventions.
//! They can be exported via OTLP to Prometheus, Grafana, Datadog, etc.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::{
    metrics::{Counter, Histogram, Meter, ObservableGauge},
    KeyValue,
};

use chainsink_core::metrics::SinkMetrics;

/// OpenTelemetry implementation of [`SinkMetrics`], tagged with the module
/// being sunk.
#[derive(Clone)]
pub struct OtelSinkMetrics {
    pub changes_applied: Counter<u64>,
    pub flush_count: Counter<u64>,
    pub flush_duration_ms: Histogram<f64>,
    pub cursor_writes: Counter<u64>,
    pub blocks_reverted: Counter<u64>,
    // Kept alive so its callback stays registered.
    _head_block_number: ObservableGauge<u64>,
    head: Arc<AtomicU64>,
    attributes: Vec<KeyValue>,
}

impl OtelSinkMetrics {
    pub fn new(meter: &Meter, module: &str) -> Self {
        let attributes = vec![KeyValue::new("module", module.to_string())];
        let head = Arc::new(AtomicU64::new(0));

        let observed = head.clone();
        let gauge_attributes = attributes.clone();
        let head_block_number = meter
            .u64_observable_gauge("chainsink.head_block_number")
            .with_description("Latest block number processed by the sink")
            .with_callback(move |observer| {
                observer.observe(observed.load(Ordering::Relaxed), &gauge_attributes)
            })
            .init();

        Self {
            changes_applied: meter
                .u64_counter("chainsink.changes_applied")
                .with_description("Table changes written to the document store")
                .init(),
            flush_count: meter
                .u64_counter("chainsink.flush_count")
                .with_description("Blocks whose changes were written to the store")
                .init(),
            flush_duration_ms: meter
                .f64_histogram("chainsink.flush_duration_ms")
                .with_description("Time to write one block's changes in milliseconds")
                .init(),
            cursor_writes: meter
                .u64_counter("chainsink.cursor_writes")
                .with_description("Cursor checkpoints persisted")
                .init(),
            blocks_reverted: meter
                .u64_counter("chainsink.blocks_reverted")
                .with_description("Blocks reverted because of chain reorganizations")
                .init(),
            _head_block_number: head_block_number,
            head,
            attributes,
        }
    }

    /// Metrics registered on the global meter provider.
    pub fn global(module: &str) -> Self {
        Self::new(&opentelemetry::global::meter("chainsink"), module)
    }

    /// Last head block recorded.
    pub fn head_block(&self) -> u64 {
        self.head.load(Ordering::Relaxed)
    }
}

impl SinkMetrics for OtelSinkMetrics {
    fn record_flush(&self, changes: u64, elapsed: Duration) {
        self.changes_applied.add(changes, &self.attributes);
        self.flush_count.add(1, &self.attributes);
        self.flush_duration_ms
            .record(elapsed.as_secs_f64() * 1000.0, &self.attributes);
    }

    fn record_cursor_write(&self, _block_number: u64) {
        self.cursor_writes.add(1, &self.attributes);
    }

    fn record_undo(&self, blocks: u64) {
        self.blocks_reverted.add(blocks, &self.attributes);
    }

    fn record_head(&self, block_number: u64) {
        self.head.store(block_number, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_on_noop_provider() {
        let metrics = OtelSinkMetrics::global("db_out");
        metrics.record_flush(3, Duration::from_millis(12));
        metrics.record_cursor_write(10);
        metrics.record_undo(2);
        metrics.record_head(10);
        assert_eq!(metrics.head_block(), 10);

        // A reorg moves the head back.
        metrics.record_head(8);
        assert_eq!(metrics.head_block(), 8);
    }
}
