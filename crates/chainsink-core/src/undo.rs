//! Undo buffer: a sliding window of recently applied blocks together with
//! the inverse of every mutation they made, so a chain reorganization can be
//! rolled back to the fork point.

use std::collections::VecDeque;

use crate::error::SinkError;
use crate::types::BlockRef;
use crate::value::Document;

/// How to restore one document to its state before a change.
#[derive(Debug, Clone, PartialEq)]
pub struct InverseOp {
    pub collection: String,
    pub id: String,
    /// The document before the change; `None` if it did not exist.
    pub previous: Option<Document>,
}

/// An applied block and the inverse operations of its changes, in
/// application order.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedBlock {
    pub block: BlockRef,
    pub inverse: Vec<InverseOp>,
}

/// Retains the last `capacity` applied blocks for reorg reversal.
#[derive(Debug)]
pub struct UndoBuffer {
    /// Oldest first.
    window: VecDeque<BufferedBlock>,
    capacity: usize,
    /// Highest block number that can no longer be reverted (evicted or final).
    sealed_through: Option<u64>,
}

impl UndoBuffer {
    /// Create a buffer retaining up to `capacity` blocks.
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            sealed_through: None,
        }
    }

    /// Record an applied block, evicting the oldest one when full.
    pub fn push(&mut self, block: BufferedBlock) {
        if self.capacity == 0 {
            self.seal(block.block.number);
            return;
        }
        if self.window.len() >= self.capacity {
            if let Some(evicted) = self.window.pop_front() {
                self.seal(evicted.block.number);
            }
        }
        self.window.push_back(block);
    }

    /// Remove and return every block newer than `last_valid` (newest first).
    ///
    /// Fails without touching the buffer if part of the range to revert was
    /// already evicted or finalized.
    pub fn rewind_to(&mut self, last_valid: u64) -> Result<Vec<BufferedBlock>, SinkError> {
        if let Some(sealed) = self.sealed_through {
            if last_valid < sealed {
                return Err(SinkError::UndoUnavailable {
                    fork_block: last_valid,
                    oldest_revertible: sealed + 1,
                });
            }
        }

        let mut reverted = Vec::new();
        while let Some(back) = self.window.back() {
            if back.block.number > last_valid {
                if let Some(block) = self.window.pop_back() {
                    reverted.push(block);
                }
            } else {
                break;
            }
        }
        Ok(reverted)
    }

    /// Drop blocks at or below the irreversible watermark.
    pub fn finalize(&mut self, final_block: u64) {
        while let Some(front) = self.window.front() {
            if front.block.number <= final_block {
                self.window.pop_front();
            } else {
                break;
            }
        }
        self.seal(final_block);
    }

    /// Mark every block up to `block_number` as no longer revertible, e.g.
    /// blocks applied before a restart.
    pub fn seal_through(&mut self, block_number: u64) {
        self.seal(block_number);
    }

    /// Most recently buffered block.
    pub fn head(&self) -> Option<&BlockRef> {
        self.window.back().map(|b| &b.block)
    }

    /// Number of buffered blocks.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Returns `true` if no block is buffered.
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn seal(&mut self, block_number: u64) {
        self.sealed_through = Some(self.sealed_through.map_or(block_number, |s| s.max(block_number)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64) -> BufferedBlock {
        BufferedBlock {
            block: BlockRef::new(format!("0x{number}"), number),
            inverse: vec![InverseOp {
                collection: "users".into(),
                id: format!("u{number}"),
                previous: None,
            }],
        }
    }

    #[test]
    fn window_size_enforced() {
        let mut buffer = UndoBuffer::new(3);
        for i in 100..110 {
            buffer.push(block(i));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.head().unwrap().number, 109);
    }

    #[test]
    fn rewind_returns_newest_first() {
        let mut buffer = UndoBuffer::new(10);
        for i in 100..=105 {
            buffer.push(block(i));
        }
        let reverted = buffer.rewind_to(102).unwrap();
        let numbers: Vec<_> = reverted.iter().map(|b| b.block.number).collect();
        assert_eq!(numbers, vec![105, 104, 103]);
        assert_eq!(buffer.head().unwrap().number, 102);
    }

    #[test]
    fn rewind_to_head_is_empty() {
        let mut buffer = UndoBuffer::new(10);
        buffer.push(block(100));
        assert!(buffer.rewind_to(100).unwrap().is_empty());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn rewind_past_evicted_blocks_fails() {
        let mut buffer = UndoBuffer::new(2);
        for i in 100..=104 {
            buffer.push(block(i));
        }
        // 100..=102 evicted; 103 and 104 retained.
        assert!(buffer.rewind_to(102).is_ok_and(|r| r.len() == 2));

        let mut buffer = UndoBuffer::new(2);
        for i in 100..=104 {
            buffer.push(block(i));
        }
        match buffer.rewind_to(101) {
            Err(SinkError::UndoUnavailable { fork_block, oldest_revertible }) => {
                assert_eq!(fork_block, 101);
                assert_eq!(oldest_revertible, 103);
            }
            other => panic!("expected UndoUnavailable, got {other:?}"),
        }
        assert_eq!(buffer.len(), 2, "failed rewind must not drop blocks");
    }

    #[test]
    fn sealed_resume_point_blocks_deeper_rewinds() {
        let mut buffer = UndoBuffer::new(10);
        buffer.seal_through(100);
        assert!(matches!(
            buffer.rewind_to(99),
            Err(SinkError::UndoUnavailable { fork_block: 99, oldest_revertible: 101 })
        ));

        buffer.push(block(101));
        buffer.push(block(102));
        assert_eq!(buffer.rewind_to(100).unwrap().len(), 2);
    }

    #[test]
    fn finalize_drops_irreversible_blocks() {
        let mut buffer = UndoBuffer::new(10);
        for i in 100..=105 {
            buffer.push(block(i));
        }
        buffer.finalize(103);
        assert_eq!(buffer.len(), 2);
        assert!(buffer.rewind_to(102).is_err());
        assert_eq!(buffer.rewind_to(103).unwrap().len(), 2);
    }
}
