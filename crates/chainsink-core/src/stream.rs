//! Block-step stream: the sink's inbound collaborator.
//!
//! The sink only needs an ordered, resumable sequence of block steps. Network
//! transports live outside this crate; two replay implementations are
//! provided: [`ReplayStream`] (in memory) and [`JsonLinesStream`]
//! (newline-delimited JSON from any async reader).
//!
//! JSON lines look like:
//!
//! ```text
//! {"step":"new","cursor":"c1","clock":{"id":"0xa","number":100},"outputs":[{"name":"db_out","map_output":{"table_changes":[]}}]}
//! {"step":"undo","cursor":"c2","last_valid_block":{"id":"0x9","number":99}}
//! {"step":"irreversible","cursor":"c3","clock":{"id":"0x9","number":99}}
//! ```

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use crate::cursor::Cursor;
use crate::error::SinkError;
use crate::types::{BlockRef, BlockStep, Clock, ModuleOutput};

/// Trait for the ordered source of block steps.
#[async_trait]
pub trait BlockStream: Send {
    /// Position the stream right after `cursor`. Called at most once, before
    /// the first `next_step`; without it the stream starts at its beginning.
    async fn resume_from(&mut self, cursor: &Cursor) -> Result<(), SinkError>;

    /// The next step, or `None` once the stream is exhausted.
    async fn next_step(&mut self) -> Result<Option<BlockStep>, SinkError>;

    /// Returns `true` if the stream may deliver undo (reorg) steps.
    fn emits_undo(&self) -> bool;
}

/// Skips the steps a resumed stream has already delivered.
#[derive(Debug, Default)]
struct ResumeFilter {
    after: Option<Cursor>,
}

impl ResumeFilter {
    /// Returns `true` if `step` should be delivered.
    fn admit(&mut self, step: &BlockStep) -> bool {
        let Some(after) = &self.after else {
            return true;
        };
        if matches!(step, BlockStep::Undo { .. }) {
            // Its block is the fork point, which is behind the head by nature.
            self.after = None;
            return true;
        }
        if !after.is_blank() && step.cursor().token == after.token {
            // The step the cursor was taken at; everything after is new.
            self.after = None;
            return false;
        }
        if step.block_number() <= after.block.number {
            return false;
        }
        self.after = None;
        true
    }
}

// ─── ReplayStream ─────────────────────────────────────────────────────────────

/// In-memory stream of pre-built steps, for tests and embedding.
pub struct ReplayStream {
    steps: VecDeque<BlockStep>,
    emits_undo: bool,
    resume: ResumeFilter,
}

impl ReplayStream {
    /// Create a stream over `steps`. It announces undo steps only if it
    /// contains some.
    pub fn new(steps: Vec<BlockStep>) -> Self {
        let emits_undo = steps.iter().any(|s| matches!(s, BlockStep::Undo { .. }));
        Self {
            steps: steps.into(),
            emits_undo,
            resume: ResumeFilter::default(),
        }
    }

    /// Override whether the stream announces undo steps.
    pub fn with_undo(mut self, emits_undo: bool) -> Self {
        self.emits_undo = emits_undo;
        self
    }

    /// Steps not delivered yet.
    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

#[async_trait]
impl BlockStream for ReplayStream {
    async fn resume_from(&mut self, cursor: &Cursor) -> Result<(), SinkError> {
        self.resume = ResumeFilter {
            after: Some(cursor.clone()),
        };
        Ok(())
    }

    async fn next_step(&mut self) -> Result<Option<BlockStep>, SinkError> {
        while let Some(step) = self.steps.pop_front() {
            if self.resume.admit(&step) {
                return Ok(Some(step));
            }
        }
        Ok(None)
    }

    fn emits_undo(&self) -> bool {
        self.emits_undo
    }
}

// ─── JsonLinesStream ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(tag = "step", rename_all = "lowercase")]
enum WireStep {
    New {
        cursor: String,
        clock: Clock,
        #[serde(default)]
        outputs: Vec<WireOutput>,
    },
    Undo {
        cursor: String,
        last_valid_block: BlockRef,
    },
    Irreversible {
        cursor: String,
        clock: Clock,
    },
}

#[derive(Deserialize)]
struct WireOutput {
    name: String,
    map_output: serde_json::Value,
}

impl WireStep {
    fn into_step(self) -> Result<BlockStep, serde_json::Error> {
        Ok(match self {
            Self::New {
                cursor,
                clock,
                outputs,
            } => BlockStep::New {
                cursor: Cursor::new(cursor, clock.block_ref()),
                outputs: outputs
                    .into_iter()
                    .map(|o| {
                        Ok(ModuleOutput {
                            name: o.name,
                            payload: serde_json::to_vec(&o.map_output)?,
                        })
                    })
                    .collect::<Result<_, serde_json::Error>>()?,
                clock,
            },
            Self::Undo {
                cursor,
                last_valid_block,
            } => BlockStep::Undo {
                cursor: Cursor::new(cursor, last_valid_block.clone()),
                last_valid_block,
            },
            Self::Irreversible { cursor, clock } => BlockStep::Irreversible {
                cursor: Cursor::new(cursor, clock.block_ref()),
                clock,
            },
        })
    }
}

/// Reads block steps from newline-delimited JSON.
pub struct JsonLinesStream<R> {
    lines: Lines<R>,
    line_no: u64,
    emits_undo: bool,
    resume: ResumeFilter,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesStream<R> {
    /// `emits_undo` declares whether the input may contain undo steps.
    pub fn new(reader: R, emits_undo: bool) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            emits_undo,
            resume: ResumeFilter::default(),
        }
    }

    async fn read_step(&mut self) -> Result<Option<BlockStep>, SinkError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| SinkError::Stream(format!("reading line {}: {e}", self.line_no + 1)))?;
            let Some(line) = line else {
                return Ok(None);
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let step = serde_json::from_str::<WireStep>(&line)
                .and_then(WireStep::into_step)
                .map_err(|e| SinkError::Decode(format!("line {}: {e}", self.line_no)))?;
            return Ok(Some(step));
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> BlockStream for JsonLinesStream<R> {
    async fn resume_from(&mut self, cursor: &Cursor) -> Result<(), SinkError> {
        self.resume = ResumeFilter {
            after: Some(cursor.clone()),
        };
        Ok(())
    }

    async fn next_step(&mut self) -> Result<Option<BlockStep>, SinkError> {
        while let Some(step) = self.read_step().await? {
            if self.resume.admit(&step) {
                return Ok(Some(step));
            }
        }
        Ok(None)
    }

    fn emits_undo(&self) -> bool {
        self.emits_undo
    }
}
