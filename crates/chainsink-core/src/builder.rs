//! Fluent builder API for sink configuration.
//!
//! # Example
//!
//! ```rust
//! use chainsink_core::builder::SinkBuilder;
//! use chainsink_core::config::BlockRange;
//!
//! let config = SinkBuilder::new()
//!     .module_name("db_out")
//!     .block_range(BlockRange::new(17_000_000, None))
//!     .undo_buffer_size(12)
//!     .build_config();
//! assert_eq!(config.seed_block(), 16_999_999);
//! ```

use crate::config::{BlockRange, SinkConfig};

/// Fluent builder for `SinkConfig`.
#[derive(Default)]
pub struct SinkBuilder {
    config: SinkConfig,
}

impl SinkBuilder {
    pub fn new() -> Self {
        Self {
            config: SinkConfig::default(),
        }
    }

    /// Set the output module to consume.
    pub fn module_name(mut self, name: impl Into<String>) -> Self {
        self.config.module_name = name.into();
        self
    }

    /// Set the output module hash (cursor key).
    pub fn module_hash(mut self, hash: impl Into<String>) -> Self {
        self.config.module_hash = hash.into();
        self
    }

    /// Set the module's initial block.
    pub fn initial_block(mut self, block: u64) -> Self {
        self.config.initial_block = block;
        self
    }

    /// Restrict processing to a block range.
    pub fn block_range(mut self, range: BlockRange) -> Self {
        self.config.block_range = Some(range);
        self
    }

    /// Retain `size` blocks for reorg undo.
    pub fn undo_buffer_size(mut self, size: usize) -> Self {
        self.config.undo_buffer_size = size;
        self
    }

    /// Blocks younger than `secs` seconds are live.
    pub fn live_block_time_delta_secs(mut self, secs: u64) -> Self {
        self.config.live_block_time_delta_secs = secs;
        self
    }

    /// Set the catch-up checkpoint interval (every N blocks).
    pub fn checkpoint_interval(mut self, n: u64) -> Self {
        self.config.checkpoint_interval = n;
        self
    }

    /// Set the live checkpoint interval (every N blocks).
    pub fn live_checkpoint_interval(mut self, n: u64) -> Self {
        self.config.live_checkpoint_interval = n;
        self
    }

    /// Set the per-call store deadline in milliseconds.
    pub fn store_timeout_ms(mut self, ms: u64) -> Self {
        self.config.store_timeout_ms = ms;
        self
    }

    /// Set the final cursor write deadline in milliseconds.
    pub fn shutdown_flush_timeout_ms(mut self, ms: u64) -> Self {
        self.config.shutdown_flush_timeout_ms = ms;
        self
    }

    /// Build the `SinkConfig`.
    pub fn build_config(self) -> SinkConfig {
        self.config
    }
}
