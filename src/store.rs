//! Durable block storage on SQLite.
//!
//! The store is a dumb, ordered sink: it checks that each appended block
//! extends the stored tail but never recomputes hashes.  Integrity is the
//! chain's job, which re-verifies everything it loads.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension as _, TransactionBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use crate::block::{Block, BlockData, GENESIS_PREVIOUS_HASH};
use crate::chain::{LedgerMeta, LEDGER_SCHEMA_VERSION};
use crate::error::{LedgerError, OptionExt as _, Result, ResultExt as _};

/// Append-only persistence behind a [`Chain`](crate::chain::Chain).
pub trait BlockStore: Send + Sync {
    fn meta(&self) -> &LedgerMeta;

    /// Stored blocks, ascending by index, up to the first row that no
    /// longer decodes.
    fn load_blocks(&self) -> Result<LoadedBlocks>;

    /// Persist `block` as the new tail.  Must fail without side effects if
    /// `block` does not extend the stored tail.
    fn append(&self, block: &Block) -> Result<()>;
}

/// Result of reading a store back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedBlocks {
    /// The decodable prefix.
    pub blocks: Vec<Block>,
    /// Chain position of the first row that could not be decoded.
    pub undecodable_at: Option<u64>,
}

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=FULL;

    CREATE TABLE IF NOT EXISTS meta(
      k TEXT PRIMARY KEY,
      v TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS blocks(
      idx INTEGER PRIMARY KEY,
      timestamp INTEGER NOT NULL,
      product_id INTEGER,
      data_json TEXT NOT NULL,
      previous_hash TEXT NOT NULL,
      nonce INTEGER NOT NULL,
      hash TEXT NOT NULL UNIQUE
    );

    CREATE INDEX IF NOT EXISTS idx_blocks_product ON blocks(product_id);
"#;

pub struct SqliteStore {
    conn: Mutex<Connection>,
    meta: LedgerMeta,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

fn open_conn(db_path: &Path) -> Result<Connection> {
    Connection::open(db_path).ctx_storage(&format!("open db {}", db_path.display()))
}

fn decode_row(row: &rusqlite::Row<'_>) -> Result<Block> {
    let idx: i64 = row.get(0)?;
    let timestamp: i64 = row.get(1)?;
    let data_json: String = row.get(2)?;
    let nonce: i64 = row.get(4)?;
    let data: BlockData = serde_json::from_str(&data_json)
        .ctx_storage(&format!("decode data of block {idx}"))?;
    Ok(Block {
        index: from_sql_int(idx, "index")?,
        timestamp: from_sql_int(timestamp, "timestamp")?,
        data,
        previous_hash: row.get(3)?,
        nonce: from_sql_int(nonce, "nonce")?,
        hash: row.get(5)?,
    })
}

fn to_sql_int(v: u64, what: &str) -> Result<i64> {
    i64::try_from(v).map_err(|_| LedgerError::Storage(format!("{what} {v} exceeds SQLite integer range")))
}

fn from_sql_int(v: i64, what: &str) -> Result<u64> {
    u64::try_from(v).map_err(|_| LedgerError::Storage(format!("negative {what} {v} in store")))
}

impl SqliteStore {
    /// Create a fresh database carrying `meta`.  Fails if `db_path` already
    /// holds a ledger.
    pub fn create_with_meta(db_path: &Path, meta: LedgerMeta) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .ctx_storage(&format!("create db parent dir {}", parent.display()))?;
            }
        }
        let conn = open_conn(db_path)?;
        conn.execute_batch(SCHEMA).ctx_storage("create tables")?;

        let existing: Option<String> = conn
            .query_row("SELECT v FROM meta WHERE k='ledger_id'", [], |row| row.get(0))
            .optional()?;
        if let Some(id) = existing {
            return Err(LedgerError::Storage(format!(
                "{} already holds ledger {id}",
                db_path.display()
            )));
        }

        for (k, v) in [
            ("ledger_id", meta.ledger_id.to_string()),
            ("created_at_utc", meta.created_at_utc.clone()),
            ("schema_version", meta.schema_version.to_string()),
            ("difficulty", meta.difficulty.to_string()),
        ] {
            conn.execute("INSERT INTO meta(k,v) VALUES (?1,?2)", params![k, v])?;
        }
        info!(path = %db_path.display(), ledger_id = %meta.ledger_id, "ledger database created");
        Ok(Self {
            conn: Mutex::new(conn),
            meta,
        })
    }

    pub fn create_new(db_path: &Path, difficulty: u32) -> Result<Self> {
        Self::create_with_meta(db_path, LedgerMeta::new(difficulty))
    }

    pub fn open_existing(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            return Err(LedgerError::Storage(format!(
                "ledger database {} does not exist",
                db_path.display()
            )));
        }
        let conn = open_conn(db_path)?;
        let read = |k: &str| -> Result<String> {
            conn.query_row("SELECT v FROM meta WHERE k=?1", params![k], |row| row.get(0))
                .optional()?
                .required_storage(&format!("meta key '{k}' missing"))
        };

        let ledger_id = Uuid::parse_str(&read("ledger_id")?).ctx_storage("parse ledger_id uuid")?;
        let created_at_utc = read("created_at_utc")?;
        let schema_version: i64 = read("schema_version")?
            .parse()
            .ctx_storage("parse schema_version")?;
        if schema_version != LEDGER_SCHEMA_VERSION {
            return Err(LedgerError::Storage(format!(
                "unsupported schema_version {schema_version} (expected {LEDGER_SCHEMA_VERSION})"
            )));
        }
        let difficulty: u32 = read("difficulty")?.parse().ctx_storage("parse difficulty")?;

        let meta = LedgerMeta {
            ledger_id,
            created_at_utc,
            schema_version,
            difficulty,
        };
        Ok(Self {
            conn: Mutex::new(conn),
            meta,
        })
    }

    /// Open `db_path` if it exists, otherwise create it at `difficulty`.
    pub fn open_or_create(db_path: &Path, difficulty: u32) -> Result<Self> {
        if db_path.exists() {
            Self::open_existing(db_path)
        } else {
            Self::create_new(db_path, difficulty)
        }
    }

    pub fn block_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM blocks", [], |row| row.get(0))
            .ctx_storage("count blocks")?;
        from_sql_int(n, "block count")
    }
}

impl BlockStore for SqliteStore {
    fn meta(&self) -> &LedgerMeta {
        &self.meta
    }

    fn load_blocks(&self) -> Result<LoadedBlocks> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT idx, timestamp, data_json, previous_hash, nonce, hash
                 FROM blocks ORDER BY idx ASC",
            )
            .ctx_storage("prepare select blocks")?;

        let mut rows = stmt.query([]).ctx_storage("query blocks")?;
        let mut out = LoadedBlocks::default();
        while let Some(row) = rows.next().ctx_storage("next row")? {
            match decode_row(row) {
                Ok(block) => out.blocks.push(block),
                Err(e) => {
                    let position = out.blocks.len() as u64;
                    warn!(position, error = %e, "stored block does not decode; ignoring the rest");
                    out.undecodable_at = Some(position);
                    break;
                }
            }
        }
        Ok(out)
    }

    fn append(&self, block: &Block) -> Result<()> {
        let data_json = serde_json::to_string(&block.data).ctx_serialization("encode block data")?;
        let product_id = block
            .product_id()
            .map(|p| to_sql_int(p, "product_id"))
            .transpose()?;

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .ctx_storage("begin tx")?;

        let tail: Option<(i64, String)> = tx
            .query_row(
                "SELECT idx, hash FROM blocks ORDER BY idx DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (next_idx, tail_hash) = match tail {
            Some((i, h)) => (from_sql_int(i, "index")? + 1, h),
            None => (0, GENESIS_PREVIOUS_HASH.to_string()),
        };
        if block.index != next_idx || block.previous_hash != tail_hash {
            return Err(LedgerError::Storage(format!(
                "block {} does not extend stored tail (next index {next_idx})",
                block.index
            )));
        }

        tx.execute(
            "INSERT INTO blocks(idx, timestamp, product_id, data_json, previous_hash, nonce, hash)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                to_sql_int(block.index, "index")?,
                to_sql_int(block.timestamp, "timestamp")?,
                product_id,
                data_json,
                block.previous_hash,
                to_sql_int(block.nonce, "nonce")?,
                block.hash,
            ],
        )
        .ctx_storage("insert block")?;

        tx.commit().ctx_storage("commit tx")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
