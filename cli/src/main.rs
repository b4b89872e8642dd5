//! ChainSink CLI: run the sink and manage its cursor.
//!
//! # Commands
//! ```text
//! chainsink run    --schema <schema.json> --module <name> [--input <steps.jsonl|->]
//!                  [--store <memory|path.db>] [--range <start:stop>] ...
//! chainsink cursor show  --store <path.db> --module <name>
//! chainsink cursor reset --store <path.db> --module <name>
//! chainsink info
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use chainsink_core::cursor::StreamId;
use chainsink_observability::{init_tracing, LogConfig};

mod cmd_cursor;
mod cmd_run;
mod signal;

#[derive(Parser)]
#[command(
    name = "chainsink",
    about = "Block-stream database changes to a document store (ChainSink CLI)",
    long_about = "
ChainSink CLI: apply the DatabaseChanges emitted by an output module to a
document store, with a resumable cursor and reorg undo.

Block steps are read as newline-delimited JSON, one step per line:
  {\"step\":\"new\",\"cursor\":\"..\",\"clock\":{..},\"outputs\":[{\"name\":\"db_out\",\"map_output\":{..}}]}
  {\"step\":\"undo\",\"cursor\":\"..\",\"last_valid_block\":{\"id\":\"..\",\"number\":N}}
  {\"step\":\"irreversible\",\"cursor\":\"..\",\"clock\":{..}}
",
    version
)]
struct Cli {
    /// Global log level: trace | debug | info | warn | error
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Identifies the output module whose cursor is used.
#[derive(clap::Args, Clone)]
pub struct ModuleArgs {
    /// Output module name
    #[arg(long, default_value = "db_out")]
    module: String,
    /// File holding the module definition; its content is part of the
    /// cursor key so a changed module starts from scratch
    #[arg(long)]
    module_definition: Option<PathBuf>,
}

impl ModuleArgs {
    /// Cursor key: hash of the module name and its definition file.
    fn stream_id(&self) -> Result<StreamId> {
        let definition = match &self.module_definition {
            Some(path) => std::fs::read(path)
                .with_context(|| format!("reading module definition {}", path.display()))?,
            None => Vec::new(),
        };
        Ok(StreamId::from_module(&self.module, &definition))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Consume block steps and apply their changes
    Run(cmd_run::RunArgs),

    /// Inspect or reset the persisted cursor
    Cursor {
        #[command(subcommand)]
        action: CursorAction,
    },

    /// Show ChainSink defaults and capabilities
    Info,
}

#[derive(Subcommand)]
enum CursorAction {
    /// Print the persisted cursor
    Show {
        /// SQLite database path
        #[arg(long)]
        store: String,
        #[command(flatten)]
        module: ModuleArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete the persisted cursor; the next run starts from the range start
    Reset {
        /// SQLite database path
        #[arg(long)]
        store: String,
        #[command(flatten)]
        module: ModuleArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log = LogConfig {
        level: cli.log_level.clone(),
        json: cli.log_json,
        ..Default::default()
    };
    // sqlx logs every statement at info.
    log.components.insert("sqlx".into(), "warn".into());
    init_tracing(&log);

    match cli.command {
        Commands::Run(args) => cmd_run::run(args).await,
        Commands::Cursor { action } => match action {
            CursorAction::Show {
                store,
                module,
                json,
            } => cmd_cursor::show(&store, &module, json).await,
            CursorAction::Reset { store, module } => cmd_cursor::reset(&store, &module).await,
        },
        Commands::Info => cmd_info(),
    }
}

fn cmd_info() -> Result<()> {
    use chainsink_core::checkpoint::{BLOCK_PROGRESS, LIVE_BLOCK_PROGRESS};
    use chainsink_core::config::SinkConfig;

    let defaults = SinkConfig::default();
    println!("ChainSink v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Defaults:");
    println!("  Output module:              {}", defaults.module_name);
    println!("  Checkpoint interval:        every {BLOCK_PROGRESS} blocks (catching up)");
    println!("                              every {LIVE_BLOCK_PROGRESS} block (live)");
    println!("  Live block time delta:      {}s", defaults.live_block_time_delta_secs);
    println!("  Store call timeout:         {}ms", defaults.store_timeout_ms);
    println!("  Final cursor write timeout: {}ms", defaults.shutdown_flush_timeout_ms);
    println!("  Undo buffer (run command):  {} blocks", cmd_run::DEFAULT_UNDO_BUFFER_SIZE);
    println!("  Shutdown grace period:      {}s", cmd_run::SHUTDOWN_GRACE.as_secs());
    println!();
    println!("Field types:     integer, double, boolean, timestamp, date, null, string");
    println!("Store backends:  memory, SQLite (JSON documents)");
    println!("Input:           newline-delimited JSON block steps (file or stdin)");
    Ok(())
}
