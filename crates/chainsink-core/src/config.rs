//! Sink configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checkpoint::{CheckpointPolicy, BLOCK_PROGRESS, LIVE_BLOCK_PROGRESS};
use crate::cursor::StreamId;
use crate::error::SinkError;

/// Configuration for a sink instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Output module whose `DatabaseChanges` are applied.
    pub module_name: String,
    /// Stable hash of the output module (cursor key).
    pub module_hash: String,
    /// First block the module produces data for.
    pub initial_block: u64,
    /// Block range to process; `None` = from the cursor, forever.
    pub block_range: Option<BlockRange>,
    /// Number of recent blocks retained to undo reorgs. `0` disables undo.
    pub undo_buffer_size: usize,
    /// Blocks younger than this are considered live.
    pub live_block_time_delta_secs: u64,
    /// Checkpoint every N blocks while catching up.
    pub checkpoint_interval: u64,
    /// Checkpoint every N blocks while live.
    pub live_checkpoint_interval: u64,
    /// Deadline for each store call (milliseconds).
    pub store_timeout_ms: u64,
    /// Deadline for the final cursor write on graceful shutdown (milliseconds).
    pub shutdown_flush_timeout_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            module_name: "db_out".into(),
            module_hash: String::new(),
            initial_block: 0,
            block_range: None,
            undo_buffer_size: 0,
            live_block_time_delta_secs: 300,
            checkpoint_interval: BLOCK_PROGRESS,
            live_checkpoint_interval: LIVE_BLOCK_PROGRESS,
            store_timeout_ms: 30_000,
            shutdown_flush_timeout_ms: 10_000,
        }
    }
}

impl SinkConfig {
    /// Reject configurations the sink cannot run with.
    pub fn validate(&self) -> Result<(), SinkError> {
        if self.module_name.is_empty() {
            return Err(SinkError::Configuration("module name is required".into()));
        }
        if self.checkpoint_interval == 0 || self.live_checkpoint_interval == 0 {
            return Err(SinkError::Configuration(
                "checkpoint intervals must be greater than zero".into(),
            ));
        }
        if let Some(range) = &self.block_range {
            if range.stop.is_some_and(|stop| stop <= range.start) {
                return Err(SinkError::Configuration(format!(
                    "block range {range} is empty"
                )));
            }
        }
        if self.store_timeout_ms == 0 {
            return Err(SinkError::Configuration(
                "store timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// The cursor key for this sink's output stream.
    pub fn stream_id(&self) -> StreamId {
        if self.module_hash.is_empty() {
            StreamId::from_module(&self.module_name, &[])
        } else {
            StreamId::from_hash(self.module_hash.clone())
        }
    }

    /// Block number the cursor is seeded at when none was persisted yet.
    pub fn seed_block(&self) -> u64 {
        match self.block_range.as_ref().map(|r| r.start) {
            Some(start) if start > 0 => start - 1,
            _ => self.initial_block,
        }
    }

    /// First block the sink processes on a fresh start.
    pub fn first_block(&self) -> u64 {
        self.block_range.map_or(self.initial_block, |r| r.start)
    }

    pub fn checkpoint_policy(&self) -> CheckpointPolicy {
        CheckpointPolicy::new(self.checkpoint_interval, self.live_checkpoint_interval)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn shutdown_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_flush_timeout_ms)
    }

    pub fn live_block_time_delta(&self) -> Duration {
        Duration::from_secs(self.live_block_time_delta_secs)
    }
}

// ─── BlockRange ───────────────────────────────────────────────────────────────

/// A block range: `start` inclusive, `stop` exclusive (`None` = unbounded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub start: u64,
    pub stop: Option<u64>,
}

impl BlockRange {
    pub fn new(start: u64, stop: Option<u64>) -> Self {
        Self { start, stop }
    }

    /// Parse `""`, `start:`, `:stop`, `start:stop` or `start:+count`.
    ///
    /// An empty start means `initial_block`.
    pub fn parse(input: &str, initial_block: u64) -> Result<Self, SinkError> {
        let input = input.trim();
        let invalid = |why: &str| SinkError::Configuration(format!("invalid block range {input:?}: {why}"));

        if input.is_empty() {
            return Ok(Self::new(initial_block, None));
        }

        let (start_raw, stop_raw) = match input.split_once(':') {
            Some(parts) => parts,
            None => (input, ""),
        };

        let start = match start_raw.trim() {
            "" => initial_block,
            s => s.parse::<u64>().map_err(|_| invalid("start is not a block number"))?,
        };

        let stop = match stop_raw.trim() {
            "" => None,
            s => match s.strip_prefix('+') {
                Some(count) => {
                    let count = count
                        .parse::<u64>()
                        .map_err(|_| invalid("relative stop is not a number"))?;
                    Some(start.checked_add(count).ok_or_else(|| invalid("stop overflows"))?)
                }
                None => Some(s.parse::<u64>().map_err(|_| invalid("stop is not a block number"))?),
            },
        };

        if let Some(stop) = stop {
            if stop <= start {
                return Err(invalid("stop must be greater than start"));
            }
        }
        if start < initial_block {
            return Err(invalid("start is before the module's initial block"));
        }

        Ok(Self::new(start, stop))
    }

    /// Returns `true` if `block_number` is at or past the exclusive stop.
    pub fn is_past_stop(&self, block_number: u64) -> bool {
        self.stop.is_some_and(|stop| block_number >= stop)
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.stop {
            Some(stop) => write!(f, "[{}, {})", self.start, stop),
            None => write!(f, "[{}, ∞)", self.start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ranges() {
        assert_eq!(BlockRange::parse("", 5).unwrap(), BlockRange::new(5, None));
        assert_eq!(BlockRange::parse("100:", 0).unwrap(), BlockRange::new(100, None));
        assert_eq!(BlockRange::parse("100", 0).unwrap(), BlockRange::new(100, None));
        assert_eq!(BlockRange::parse(":200", 10).unwrap(), BlockRange::new(10, Some(200)));
        assert_eq!(BlockRange::parse("100:200", 0).unwrap(), BlockRange::new(100, Some(200)));
        assert_eq!(BlockRange::parse("100:+50", 0).unwrap(), BlockRange::new(100, Some(150)));
    }

    #[test]
    fn parse_rejects_bad_ranges() {
        assert!(BlockRange::parse("200:100", 0).unwrap_err().is_configuration());
        assert!(BlockRange::parse("100:100", 0).is_err());
        assert!(BlockRange::parse("abc:", 0).is_err());
        assert!(BlockRange::parse("1:+x", 0).is_err());
        assert!(BlockRange::parse("5:", 10).is_err());
    }

    #[test]
    fn stop_is_exclusive() {
        let range = BlockRange::new(100, Some(200));
        assert!(!range.is_past_stop(199));
        assert!(range.is_past_stop(200));
        assert!(!BlockRange::new(0, None).is_past_stop(u64::MAX));
    }

    #[test]
    fn seed_block_is_one_before_start() {
        let config = SinkConfig {
            block_range: Some(BlockRange::new(100, None)),
            ..Default::default()
        };
        assert_eq!(config.seed_block(), 99);
    }

    #[test]
    fn seed_block_defaults_to_initial_block() {
        let config = SinkConfig {
            initial_block: 12,
            block_range: Some(BlockRange::new(0, None)),
            ..Default::default()
        };
        assert_eq!(config.seed_block(), 12);
        assert_eq!(SinkConfig { initial_block: 7, ..Default::default() }.seed_block(), 7);
    }

    #[test]
    fn validate_rejects_empty_module() {
        let config = SinkConfig {
            module_name: String::new(),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_configuration());
        assert!(SinkConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_range() {
        let config = SinkConfig {
            block_range: Some(BlockRange::new(100, Some(100))),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn stream_id_prefers_explicit_hash() {
        let config = SinkConfig {
            module_hash: "deadbeef".into(),
            ..Default::default()
        };
        assert_eq!(config.stream_id().as_str(), "deadbeef");
        assert_eq!(
            SinkConfig::default().stream_id(),
            StreamId::from_module("db_out", &[])
        );
    }
}
