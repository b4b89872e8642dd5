//! `chainsink cursor show|reset`: inspect or reset the persisted cursor.

use std::sync::Arc;

use anyhow::{Context, Result};

use chainsink_core::{CursorStore, DocumentCursorStore};
use chainsink_storage::SqliteDocumentStore;

use crate::ModuleArgs;

async fn open(store: &str) -> Result<DocumentCursorStore> {
    let documents = SqliteDocumentStore::open(store)
        .await
        .with_context(|| format!("opening SQLite store {store}"))?;
    Ok(DocumentCursorStore::new(Arc::new(documents)))
}

pub async fn show(store: &str, module: &ModuleArgs, as_json: bool) -> Result<()> {
    let cursors = open(store).await?;
    let stream = module.stream_id()?;

    match cursors.get(&stream).await {
        Ok(cursor) if as_json => {
            let out = serde_json::json!({
                "stream": stream.as_str(),
                "module": module.module,
                "cursor": cursor,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Ok(cursor) => {
            println!("Module:  {}", module.module);
            println!("Stream:  {stream}");
            println!("Block:   {}", cursor.block);
            if cursor.is_blank() {
                println!("Cursor:  (blank, seeded)");
            } else {
                println!("Cursor:  {}", cursor.token);
            }
        }
        Err(e) if e.is_not_found() => {
            println!("No cursor for module '{}' (stream {stream})", module.module);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

pub async fn reset(store: &str, module: &ModuleArgs) -> Result<()> {
    let cursors = open(store).await?;
    let stream = module.stream_id()?;

    cursors
        .delete(&stream)
        .await
        .with_context(|| format!("deleting cursor for stream {stream}"))?;
    tracing::info!(module = %module.module, %stream, "cursor reset");
    println!("Cursor reset for module '{}' (stream {stream})", module.module);
    Ok(())
}
