//! JSON backup and restore.
//!
//! A backup is untrusted input: import re-verifies every block before a
//! single row is written.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::block::Block;
use crate::chain::{Chain, LedgerMeta};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result, ResultExt as _};
use crate::integrity;
use crate::store::{BlockStore, SqliteStore};
use crate::util;

pub const BACKUP_FORMAT: &str = "provchain-ledger-backup-v1";

#[derive(Debug, Serialize, Deserialize)]
struct LedgerExport {
    format: String,
    exported_at_utc: String,
    meta: LedgerMeta,
    blocks: Vec<Block>,
}

/// Export the full chain (meta + blocks) to a JSON file.
pub fn export_chain_json(chain: &Chain, out_path: &Path) -> Result<()> {
    let export = LedgerExport {
        format: BACKUP_FORMAT.to_string(),
        exported_at_utc: util::now_utc_rfc3339(),
        meta: chain.meta().clone(),
        blocks: chain.blocks().iter().map(|b| Block::clone(b)).collect(),
    };
    let json = serde_json::to_vec_pretty(&export).ctx_serialization("serialize ledger export")?;
    std::fs::write(out_path, json)
        .ctx_storage(&format!("write export {}", out_path.display()))?;
    info!(path = %out_path.display(), blocks = export.blocks.len(), "ledger exported");
    Ok(())
}

/// Restore a backup into a new database at `db_path` and open it.
///
/// The ledger keeps its original id and difficulty.  A backup whose chain
/// does not verify is rejected with [`LedgerError::IntegrityViolation`].
pub fn import_chain_json(json_path: &Path, db_path: &Path, cfg: &LedgerConfig) -> Result<Chain> {
    let bytes = std::fs::read(json_path)
        .ctx_storage(&format!("read import {}", json_path.display()))?;
    let export: LedgerExport =
        serde_json::from_slice(&bytes).ctx_serialization("parse ledger backup")?;

    if export.format != BACKUP_FORMAT {
        return Err(LedgerError::Validation(format!(
            "unsupported backup format '{}' (expected {BACKUP_FORMAT})",
            export.format
        )));
    }
    if export.blocks.is_empty() {
        return Err(LedgerError::Validation("backup contains no blocks".into()));
    }
    if let Some((index, violation)) =
        integrity::first_violation(&export.blocks, export.meta.difficulty)
    {
        return Err(LedgerError::IntegrityViolation { index, violation });
    }

    let store = SqliteStore::create_with_meta(db_path, export.meta)?;
    for b in &export.blocks {
        store.append(b)?;
    }
    info!(
        path = %db_path.display(),
        blocks = export.blocks.len(),
        "ledger imported"
    );

    let cfg = LedgerConfig {
        difficulty: store.meta().difficulty,
        ..*cfg
    };
    Chain::with_store(&cfg, Box::new(store))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
