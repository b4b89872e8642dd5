//! Checkpoint cadence: when to persist the cursor.
//!
//! While catching up on history the sink writes the cursor every
//! [`BLOCK_PROGRESS`] blocks; once it follows the chain head it writes after
//! every block. A restart replays at most one interval of blocks, which is
//! harmless because change application is idempotent.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::types::Clock;

/// Checkpoint interval while catching up.
pub const BLOCK_PROGRESS: u64 = 1000;

/// Checkpoint interval near the chain head.
pub const LIVE_BLOCK_PROGRESS: u64 = 1;

/// Decides whether a block's cursor should be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPolicy {
    /// Interval (in block numbers) while not live.
    pub interval: u64,
    /// Interval while live.
    pub live_interval: u64,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            interval: BLOCK_PROGRESS,
            live_interval: LIVE_BLOCK_PROGRESS,
        }
    }
}

impl CheckpointPolicy {
    pub fn new(interval: u64, live_interval: u64) -> Self {
        Self {
            interval,
            live_interval,
        }
    }

    /// Returns `true` if the cursor for `block_number` should be written now.
    pub fn should_checkpoint(&self, block_number: u64, is_live: bool) -> bool {
        let modulo = if is_live { self.live_interval } else { self.interval };
        block_number % modulo.max(1) == 0
    }
}

/// Decides whether the sink is following the chain head.
#[derive(Debug, Clone, Copy)]
pub struct LivenessChecker {
    delta: Duration,
}

impl LivenessChecker {
    pub fn new(delta: Duration) -> Self {
        Self { delta }
    }

    /// Returns `true` if the block was produced within `delta` of now.
    pub fn is_live(&self, clock: &Clock) -> bool {
        self.is_live_at(clock, Utc::now())
    }

    /// Same as [`is_live`](Self::is_live) with an explicit current time.
    pub fn is_live_at(&self, clock: &Clock, now: DateTime<Utc>) -> bool {
        let Some(produced_at) = clock.timestamp else {
            return false;
        };
        match (now - produced_at).to_std() {
            Ok(age) => age <= self.delta,
            // Block time ahead of the local clock: it is the head.
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn catch_up_checkpoints_every_thousand_blocks() {
        let policy = CheckpointPolicy::default();
        for block in [0, 1000, 2000, 17_000] {
            assert!(policy.should_checkpoint(block, false), "{block}");
        }
        for block in [1, 999, 1001, 1999, 17_001] {
            assert!(!policy.should_checkpoint(block, false), "{block}");
        }
    }

    #[test]
    fn live_checkpoints_every_block() {
        let policy = CheckpointPolicy::default();
        assert!((1..=50).all(|block| policy.should_checkpoint(block, true)));
    }

    #[test]
    fn zero_interval_is_every_block() {
        let policy = CheckpointPolicy::new(0, 0);
        assert!(policy.should_checkpoint(7, false));
    }

    #[test]
    fn liveness_by_block_age() {
        let checker = LivenessChecker::new(Duration::from_secs(300));
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let recent = Clock::new("0xa", 10).with_timestamp(now - chrono::Duration::seconds(60));
        let old = Clock::new("0xb", 11).with_timestamp(now - chrono::Duration::seconds(301));
        let future = Clock::new("0xc", 12).with_timestamp(now + chrono::Duration::seconds(5));

        assert!(checker.is_live_at(&recent, now));
        assert!(!checker.is_live_at(&old, now));
        assert!(checker.is_live_at(&future, now));
    }

    #[test]
    fn clock_without_timestamp_is_not_live() {
        let checker = LivenessChecker::new(Duration::from_secs(300));
        assert!(!checker.is_live(&Clock::new("0xa", 10)));
    }
}
