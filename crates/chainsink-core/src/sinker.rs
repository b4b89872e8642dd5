//! The sink orchestrator: consumes block steps and drives the applier,
//! the cursor lifecycle and the undo buffer.
//!
//! # Lifecycle
//! `Init → Running → Terminating → Terminated`
//!
//! On start the cursor is loaded (or seeded and persisted), the stream is
//! resumed from it and steps are consumed one at a time:
//!   - new: apply the module's changes, advance the cursor, checkpoint
//!   - undo: revert buffered blocks down to the fork point, persist the cursor
//!   - irreversible: prune the undo buffer
//!
//! A graceful stop persists the last cursor; a failure never does.

use std::sync::{Arc, Mutex};

use crate::applier::ChangeApplier;
use crate::checkpoint::{CheckpointPolicy, LivenessChecker};
use crate::config::SinkConfig;
use crate::cursor::{Cursor, CursorStore, StreamId};
use crate::error::SinkError;
use crate::metrics::SinkMetrics;
use crate::schema::SchemaRegistry;
use crate::shutdown::{ShutdownCause, Shutter};
use crate::store::{bounded, DocumentStore};
use crate::stream::BlockStream;
use crate::types::{BlockRef, BlockStep, Clock, DatabaseChanges, ModuleOutput};
use crate::undo::{BufferedBlock, UndoBuffer};

/// Current state of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Not yet started.
    Init,
    /// Consuming block steps.
    Running,
    /// Shutdown triggered; finishing the in-flight step.
    Terminating,
    /// Done.
    Terminated,
}

impl std::fmt::Display for SinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Running => write!(f, "running"),
            Self::Terminating => write!(f, "terminating"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// What the consume loop does after a step.
enum Flow {
    Continue,
    Stop,
}

/// Applies one output module's database changes to a document store.
pub struct Sinker {
    config: SinkConfig,
    stream_id: StreamId,
    applier: ChangeApplier,
    cursors: Arc<dyn CursorStore>,
    policy: CheckpointPolicy,
    liveness: LivenessChecker,
    undo: Option<UndoBuffer>,
    last_cursor: Arc<Mutex<Option<Cursor>>>,
    final_block: Option<u64>,
    shutter: Shutter,
    metrics: Arc<dyn SinkMetrics>,
    state: SinkState,
}

impl Sinker {
    pub fn new(
        config: SinkConfig,
        store: Arc<dyn DocumentStore>,
        cursors: Arc<dyn CursorStore>,
        schema: Arc<SchemaRegistry>,
        metrics: Arc<dyn SinkMetrics>,
    ) -> Result<Self, SinkError> {
        config.validate()?;

        let applier = ChangeApplier::new(store, schema, metrics.clone())
            .with_timeout(config.store_timeout())
            .recording_inverse(config.undo_buffer_size > 0);
        let undo = (config.undo_buffer_size > 0).then(|| UndoBuffer::new(config.undo_buffer_size));

        Ok(Self {
            stream_id: config.stream_id(),
            policy: config.checkpoint_policy(),
            liveness: LivenessChecker::new(config.live_block_time_delta()),
            applier,
            cursors,
            undo,
            last_cursor: Arc::new(Mutex::new(None)),
            final_block: None,
            shutter: Shutter::new(),
            metrics,
            state: SinkState::Init,
            config,
        })
    }

    /// Use an externally owned shutdown handle (e.g. wired to OS signals).
    pub fn with_shutter(mut self, shutter: Shutter) -> Self {
        self.shutter = shutter;
        self
    }

    /// Handle to trigger or observe shutdown.
    pub fn shutter(&self) -> Shutter {
        self.shutter.clone()
    }

    /// Shared view of the last successfully processed cursor.
    pub fn last_cursor(&self) -> Arc<Mutex<Option<Cursor>>> {
        self.last_cursor.clone()
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Highest irreversible block seen so far.
    pub fn final_block(&self) -> Option<u64> {
        self.final_block
    }

    /// Read the persisted cursor, seeding and persisting one on first run.
    pub async fn load_cursor(&self) -> Result<Cursor, SinkError> {
        match self.cursors.get(&self.stream_id).await {
            Ok(cursor) => {
                tracing::info!(stream = %self.stream_id, %cursor, "Resuming from cursor");
                Ok(cursor)
            }
            Err(e) if e.is_not_found() => {
                let seed = Cursor::seeded(self.config.seed_block());
                self.cursors.put(&self.stream_id, &seed).await?;
                tracing::info!(
                    stream = %self.stream_id,
                    block = seed.block_number(),
                    "No cursor found, starting from seeded cursor"
                );
                Ok(seed)
            }
            Err(e) => Err(e),
        }
    }

    /// Consume `stream` until it ends, the block range stop is reached,
    /// shutdown is requested or an error occurs.
    pub async fn run(&mut self, stream: &mut dyn BlockStream) -> Result<(), SinkError> {
        self.state = SinkState::Running;
        tracing::info!(
            module = %self.config.module_name,
            stream = %self.stream_id,
            undo_buffer = self.config.undo_buffer_size,
            "Sink starting"
        );

        let result = self.consume(stream).await;
        self.state = SinkState::Terminating;

        let outcome = match result {
            Ok(()) => {
                self.shutter.shutdown(ShutdownCause::Requested);
                match self.shutter.cause() {
                    Some(ShutdownCause::Failed(reason)) => Err(SinkError::Stream(format!(
                        "sink stopped after failure: {reason}"
                    ))),
                    _ => {
                        self.flush_last_cursor().await;
                        Ok(())
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Sink failed, cursor not persisted");
                self.shutter.shutdown(ShutdownCause::Failed(e.to_string()));
                Err(e)
            }
        };

        self.state = SinkState::Terminated;
        tracing::info!(state = %self.state, "Sink stopped");
        outcome
    }

    async fn consume(&mut self, stream: &mut dyn BlockStream) -> Result<(), SinkError> {
        if stream.emits_undo() && self.undo.is_none() {
            return Err(SinkError::Configuration(
                "stream delivers undo steps but the undo buffer is disabled; \
                 set an undo buffer size or consume final blocks only"
                    .into(),
            ));
        }

        let cursor = self.load_cursor().await?;
        *self.last_cursor.lock().unwrap() = Some(cursor.clone());
        let resume_point = if !cursor.is_blank() {
            stream.resume_from(&cursor).await?;
            Some(cursor.block_number())
        } else if let Some(before) = self.config.first_block().checked_sub(1) {
            // A seeded cursor carries no stream position; start at the first block.
            stream.resume_from(&Cursor::seeded(before)).await?;
            Some(before)
        } else {
            None
        };
        // Blocks applied by an earlier run have no inverse ops in this buffer.
        if let (Some(block), Some(buffer)) = (resume_point, self.undo.as_mut()) {
            buffer.seal_through(block);
        }

        let shutter = self.shutter.clone();
        loop {
            let step = tokio::select! {
                biased;
                _ = shutter.terminating() => {
                    tracing::info!("Shutdown requested, no longer accepting steps");
                    return Ok(());
                }
                step = stream.next_step() => step?,
            };

            let Some(step) = step else {
                tracing::info!("Block stream ended");
                return Ok(());
            };

            let flow = match step {
                BlockStep::New {
                    cursor,
                    clock,
                    outputs,
                } => self.handle_new(cursor, &clock, &outputs).await?,
                BlockStep::Undo {
                    cursor,
                    last_valid_block,
                } => self.handle_undo(cursor, &last_valid_block).await?,
                BlockStep::Irreversible { clock, .. } => self.handle_irreversible(&clock),
            };

            if let Flow::Stop = flow {
                return Ok(());
            }
        }
    }

    async fn handle_new(
        &mut self,
        cursor: Cursor,
        clock: &Clock,
        outputs: &[ModuleOutput],
    ) -> Result<Flow, SinkError> {
        if let Some(range) = &self.config.block_range {
            if range.is_past_stop(clock.number) {
                tracing::info!(block = clock.number, range = %range, "Reached end of block range");
                return Ok(Flow::Stop);
            }
        }

        let mut applied = BufferedBlock {
            block: clock.block_ref(),
            inverse: Vec::new(),
        };
        for output in outputs {
            if output.name != self.config.module_name {
                return Err(SinkError::Integrity(format!(
                    "received output of module '{}' at block {}, expected '{}'",
                    output.name, clock.number, self.config.module_name
                )));
            }
            let changes = DatabaseChanges::decode(&output.payload).map_err(|e| {
                SinkError::Decode(format!(
                    "output of '{}' at block {}: {e}",
                    output.name, clock.number
                ))
            })?;
            let block = self.applier.apply(clock, &changes).await?;
            applied.inverse.extend(block.inverse);
        }

        *self.last_cursor.lock().unwrap() = Some(cursor.clone());
        if let Some(buffer) = self.undo.as_mut() {
            buffer.push(applied);
        }
        self.metrics.record_head(clock.number);

        let live = self.liveness.is_live(clock);
        if self.policy.should_checkpoint(clock.number, live) {
            self.persist_cursor(&cursor).await?;
        }
        Ok(Flow::Continue)
    }

    async fn handle_undo(
        &mut self,
        cursor: Cursor,
        last_valid_block: &BlockRef,
    ) -> Result<Flow, SinkError> {
        let Some(buffer) = self.undo.as_mut() else {
            return Err(SinkError::Configuration(format!(
                "received undo step to {last_valid_block} but the undo buffer is disabled"
            )));
        };
        let reverted = buffer.rewind_to(last_valid_block.number)?;
        tracing::warn!(
            fork = %last_valid_block,
            blocks = reverted.len(),
            "Reorg detected, reverting blocks"
        );

        self.applier.revert(&reverted).await?;
        self.metrics.record_undo(reverted.len() as u64);

        *self.last_cursor.lock().unwrap() = Some(cursor.clone());
        self.persist_cursor(&cursor).await?;
        Ok(Flow::Continue)
    }

    fn handle_irreversible(&mut self, clock: &Clock) -> Flow {
        let final_block = self.final_block.map_or(clock.number, |f| f.max(clock.number));
        self.final_block = Some(final_block);
        if let Some(buffer) = self.undo.as_mut() {
            buffer.finalize(final_block);
        }
        tracing::debug!(final_block, "Irreversible block");
        Flow::Continue
    }

    async fn persist_cursor(&self, cursor: &Cursor) -> Result<(), SinkError> {
        self.cursors.put(&self.stream_id, cursor).await?;
        self.metrics.record_cursor_write(cursor.block_number());
        tracing::debug!(block = cursor.block_number(), "Cursor saved");
        Ok(())
    }

    /// Best-effort write of the last cursor on graceful shutdown.
    async fn flush_last_cursor(&self) {
        let cursor = self.last_cursor.lock().unwrap().clone();
        let Some(cursor) = cursor else {
            return;
        };
        let limit = self.config.shutdown_flush_timeout();
        match bounded("writing final cursor", limit, self.persist_cursor(&cursor)).await {
            Ok(()) => tracing::info!(block = cursor.block_number(), "Final cursor saved"),
            Err(e) => tracing::error!(error = %e, "Failed to save final cursor"),
        }
    }
}
