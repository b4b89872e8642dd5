//! `chainsink run`: consume block steps into a document store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::BufReader;

use chainsink_core::{
    BlockRange, BlockStream, DocumentCursorStore, DocumentStore, JsonLinesStream,
    MemoryDocumentStore, SchemaRegistry, ShutdownCause, Shutter, SinkBuilder, Sinker,
};
use chainsink_observability::OtelSinkMetrics;
use chainsink_storage::SqliteDocumentStore;

use crate::signal::shutdown_signal;
use crate::ModuleArgs;

/// Blocks kept for reorg undo unless `--undo-buffer-size` says otherwise.
pub const DEFAULT_UNDO_BUFFER_SIZE: usize = 12;

/// How long the sink gets to stop after shutdown was triggered.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(clap::Args)]
pub struct RunArgs {
    /// Schema file: JSON object collection → field → type name
    #[arg(long)]
    schema: PathBuf,

    #[command(flatten)]
    module: ModuleArgs,

    /// Newline-delimited JSON block steps; `-` reads stdin
    #[arg(long, default_value = "-")]
    input: String,

    /// Document store: `memory` or a SQLite database path
    #[arg(long, default_value = "memory")]
    store: String,

    /// Block range: `start:`, `:stop`, `start:stop` or `start:+count` (stop exclusive)
    #[arg(long, default_value = "")]
    range: String,

    /// First block the module produces data for
    #[arg(long, default_value_t = 0)]
    initial_block: u64,

    /// Number of blocks kept to revert chain reorganizations (0 disables undo)
    #[arg(long, default_value_t = DEFAULT_UNDO_BUFFER_SIZE)]
    undo_buffer_size: usize,

    /// The input only carries final blocks and never undo steps
    #[arg(long)]
    final_blocks_only: bool,

    /// Blocks younger than this many seconds are considered live
    #[arg(long, default_value_t = 300)]
    live_block_time_delta_secs: u64,
}

/// Where documents and the cursor are kept.
#[derive(Debug, PartialEq, Eq)]
enum StoreTarget {
    Memory,
    Sqlite(String),
}

impl StoreTarget {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "" => bail!("--store must not be empty"),
            "memory" | "mem" => Ok(Self::Memory),
            path => Ok(Self::Sqlite(path.to_string())),
        }
    }

    async fn open(&self) -> Result<Arc<dyn DocumentStore>> {
        let store: Arc<dyn DocumentStore> = match self {
            Self::Memory => {
                tracing::warn!("using the in-memory store, nothing survives a restart");
                Arc::new(MemoryDocumentStore::new())
            }
            Self::Sqlite(path) => Arc::new(
                SqliteDocumentStore::open(path)
                    .await
                    .with_context(|| format!("opening SQLite store {path}"))?,
            ),
        };
        Ok(store)
    }
}

async fn open_input(input: &str, emits_undo: bool) -> Result<Box<dyn BlockStream>> {
    if input == "-" {
        return Ok(Box::new(JsonLinesStream::new(
            BufReader::new(tokio::io::stdin()),
            emits_undo,
        )));
    }
    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("opening input {input}"))?;
    Ok(Box::new(JsonLinesStream::new(BufReader::new(file), emits_undo)))
}

pub async fn run(args: RunArgs) -> Result<()> {
    let schema = SchemaRegistry::from_path(&args.schema)
        .with_context(|| format!("loading schema {}", args.schema.display()))?;
    tracing::info!(collections = schema.collection_count(), "schema loaded");

    let range = BlockRange::parse(&args.range, args.initial_block)?;
    let stream_id = args.module.stream_id()?;
    let config = SinkBuilder::new()
        .module_name(args.module.module.clone())
        .module_hash(stream_id.as_str())
        .initial_block(args.initial_block)
        .block_range(range)
        .undo_buffer_size(args.undo_buffer_size)
        .live_block_time_delta_secs(args.live_block_time_delta_secs)
        .build_config();
    tracing::info!(
        module = %config.module_name,
        stream = %stream_id,
        range = %range,
        undo_buffer = config.undo_buffer_size,
        "resolved sink configuration"
    );

    let store = StoreTarget::parse(&args.store)?.open().await?;
    let cursors = Arc::new(DocumentCursorStore::new(store.clone()).with_timeout(config.store_timeout()));
    let metrics = Arc::new(OtelSinkMetrics::global(&config.module_name));

    let shutter = Shutter::new();
    let mut sinker = Sinker::new(config, store, cursors, Arc::new(schema), metrics)?
        .with_shutter(shutter.clone());
    let mut stream = open_input(&args.input, !args.final_blocks_only).await?;

    let mut task = tokio::spawn(async move { sinker.run(stream.as_mut()).await });

    tracing::info!("ready, waiting for signal to quit");
    tokio::select! {
        signal = shutdown_signal() => {
            signal.context("installing signal handlers")?;
            tracing::info!("received termination signal, quitting application");
            shutter.shutdown(ShutdownCause::Requested);
        }
        _ = shutter.terminating() => {}
    }

    tracing::info!("waiting for sink termination");
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
        Ok(joined) => {
            joined.context("sink task panicked")??;
            Ok(())
        }
        Err(_) => {
            task.abort();
            bail!(
                "sink did not terminate within {}s, forcing exit",
                SHUTDOWN_GRACE.as_secs()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_target_parsing() {
        assert_eq!(StoreTarget::parse("memory").unwrap(), StoreTarget::Memory);
        assert_eq!(
            StoreTarget::parse("./sink.db").unwrap(),
            StoreTarget::Sqlite("./sink.db".into())
        );
        assert!(StoreTarget::parse("  ").is_err());
    }

    #[tokio::test]
    async fn missing_input_file_is_reported() {
        let err = open_input("/nonexistent/steps.jsonl", false).await.err().unwrap();
        assert!(err.to_string().contains("opening input"));
    }
}
