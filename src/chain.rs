//! The append-only, proof-of-work chain.
//!
//! Appends follow an optimistic protocol: the tail is captured under a brief
//! read lock, the nonce search runs with no lock held, and the write lock is
//! taken only to re-check the tail and commit.  If another append landed in
//! between, the block is re-mined against the new tail, up to
//! `max_append_retries` times.
//!
//! Readers snapshot the block list (cheap `Arc` clones) and never observe a
//! half-finished append.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::block::{Block, EventPayload, BlockData, GENESIS_PREVIOUS_HASH};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::integrity::{self, validate_block, Violation};
use crate::miner::{BlockSkeleton, Miner};
use crate::store::BlockStore;
use crate::util;

pub const LEDGER_SCHEMA_VERSION: i64 = 1;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMeta {
    pub ledger_id: Uuid,
    pub created_at_utc: String,
    pub schema_version: i64,
    pub difficulty: u32,
}

impl LedgerMeta {
    pub fn new(difficulty: u32) -> Self {
        Self {
            ledger_id: Uuid::new_v4(),
            created_at_utc: util::now_utc_rfc3339(),
            schema_version: LEDGER_SCHEMA_VERSION,
            difficulty,
        }
    }
}

/// Read-only view of the whole ledger.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerInfo {
    pub is_valid: bool,
    pub chain_length: u64,
    pub difficulty: u32,
    pub chain: Vec<Arc<Block>>,
}

#[derive(Default)]
struct ChainState {
    blocks: Vec<Arc<Block>>,
    /// product id -> ascending block indices
    by_product: HashMap<u64, Vec<u64>>,
}

impl ChainState {
    fn push(&mut self, block: Arc<Block>) {
        if let Some(pid) = block.product_id() {
            self.by_product.entry(pid).or_default().push(block.index);
        }
        self.blocks.push(block);
    }

    /// `(index, previous_hash)` the next block must carry.
    fn next_position(&self) -> (u64, &str) {
        match self.blocks.last() {
            Some(tail) => (tail.index + 1, tail.hash.as_str()),
            None => (0, GENESIS_PREVIOUS_HASH),
        }
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

pub struct Chain {
    meta: LedgerMeta,
    miner: Miner,
    max_append_retries: u32,
    state: RwLock<ChainState>,
    store: Option<Box<dyn BlockStore>>,
    /// First integrity violation seen; once set the chain refuses writes.
    alarm: Mutex<Option<(u64, Violation)>>,
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("meta", &self.meta)
            .field("len", &self.len())
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl Chain {
    /// In-memory chain with a freshly mined genesis block.
    pub fn new(cfg: &LedgerConfig) -> Result<Self> {
        cfg.validate()?;
        let chain = Self::assemble(LedgerMeta::new(cfg.difficulty), cfg, None, Vec::new());
        chain.genesis()?;
        Ok(chain)
    }

    /// Chain backed by `store`.  Persisted blocks are loaded as-is and then
    /// verified; a corrupt store yields an alarmed, read-only chain rather
    /// than an error so the stored prefix stays inspectable.
    pub fn with_store(cfg: &LedgerConfig, store: Box<dyn BlockStore>) -> Result<Self> {
        cfg.validate()?;
        let meta = store.meta().clone();
        if meta.difficulty != cfg.difficulty {
            warn!(
                stored = meta.difficulty,
                configured = cfg.difficulty,
                "ledger was created with a different difficulty; keeping the stored value"
            );
        }
        let loaded = store.load_blocks()?;
        let undecodable_at = loaded.undecodable_at;
        let chain = Self::assemble(meta, cfg, Some(store), loaded.blocks);
        let snapshot = chain.blocks();
        if let Some((index, violation)) = chain.scan(&snapshot) {
            error!(index, %violation, "stored ledger failed verification; opened read-only");
        } else if let Some(index) = undecodable_at {
            error!(index, "stored block does not decode; opened read-only");
            *chain.alarm.lock() = Some((index, Violation::HashMismatch));
        } else if snapshot.is_empty() {
            chain.genesis()?;
        }
        info!(
            ledger_id = %chain.meta.ledger_id,
            blocks = chain.len(),
            difficulty = chain.difficulty(),
            "ledger opened"
        );
        Ok(chain)
    }

    fn assemble(
        meta: LedgerMeta,
        cfg: &LedgerConfig,
        store: Option<Box<dyn BlockStore>>,
        blocks: Vec<Block>,
    ) -> Self {
        let mut state = ChainState::default();
        for b in blocks {
            state.push(Arc::new(b));
        }
        Self {
            miner: Miner::new(meta.difficulty, cfg.max_attempts),
            meta,
            max_append_retries: cfg.max_append_retries,
            state: RwLock::new(state),
            store,
            alarm: Mutex::new(None),
        }
    }

    pub fn meta(&self) -> &LedgerMeta {
        &self.meta
    }

    pub fn ledger_id(&self) -> Uuid {
        self.meta.ledger_id
    }

    pub fn difficulty(&self) -> u32 {
        self.miner.difficulty()
    }

    pub fn len(&self) -> u64 {
        self.state.read().blocks.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tail(&self) -> Option<Arc<Block>> {
        self.state.read().blocks.last().cloned()
    }

    pub fn block(&self, index: u64) -> Option<Arc<Block>> {
        self.state.read().blocks.get(index as usize).cloned()
    }

    /// Snapshot of every block committed so far.
    pub fn blocks(&self) -> Vec<Arc<Block>> {
        self.state.read().blocks.clone()
    }

    /// The first integrity violation observed, if any.
    pub fn alarm(&self) -> Option<(u64, Violation)> {
        *self.alarm.lock()
    }

    pub fn is_alarmed(&self) -> bool {
        self.alarm.lock().is_some()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Create the genesis block if the chain is empty.  Idempotent: later
    /// calls return the existing genesis block.
    pub fn genesis(&self) -> Result<Arc<Block>> {
        if let Some(g) = self.block(0) {
            return Ok(g);
        }
        let mined = self.miner.mine(BlockSkeleton::genesis())?;
        match self.commit(mined) {
            Ok(g) => {
                info!(hash = %g.hash, nonce = g.nonce, "genesis block created");
                Ok(g)
            }
            // Someone else committed genesis first.
            Err(LedgerError::AppendConflict { .. }) => {
                self.block(0).ok_or(LedgerError::AppendConflict { retries: 0 })
            }
            Err(e) => Err(e),
        }
    }

    /// Mine and append a block carrying `payload`.
    ///
    /// Either exactly one correctly linked block is appended, or the chain is
    /// left unchanged and the error is returned.
    #[tracing::instrument(
        skip(self, payload),
        fields(product_id = payload.product_id, event_type = %payload.event_type)
    )]
    pub fn record(&self, payload: EventPayload) -> Result<Arc<Block>> {
        self.ensure_writable()?;
        if self.is_empty() {
            self.genesis()?;
        }
        let data = BlockData::Event(payload);

        let mut conflicts = 0u32;
        loop {
            let (index, previous_hash) = {
                let state = self.state.read();
                let (i, h) = state.next_position();
                (i, h.to_string())
            };
            let skeleton = BlockSkeleton {
                index,
                timestamp: util::now_unix_secs(),
                data: data.clone(),
                previous_hash,
            };
            let mined = self.miner.mine(skeleton)?;

            match self.commit(mined) {
                Ok(block) => {
                    info!(index = block.index, hash = %block.hash, nonce = block.nonce, "block appended");
                    return Ok(block);
                }
                Err(LedgerError::AppendConflict { .. }) if conflicts < self.max_append_retries => {
                    conflicts += 1;
                    warn!(index, attempt = conflicts, "chain tail moved during mining; re-mining");
                }
                Err(LedgerError::AppendConflict { .. }) => {
                    warn!(index, retries = conflicts, "append retries exhausted");
                    return Err(LedgerError::AppendConflict { retries: conflicts });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Critical section: re-check the tail, verify, persist, publish.
    fn commit(&self, block: Block) -> Result<Arc<Block>> {
        let mut state = self.state.write();
        self.ensure_writable()?;

        let (expected_index, expected_prev) = state.next_position();
        if block.index != expected_index || block.previous_hash != expected_prev {
            return Err(LedgerError::AppendConflict { retries: 0 });
        }
        if let Err(violation) =
            validate_block(&block, expected_prev, expected_index, self.difficulty())
        {
            return Err(LedgerError::IntegrityViolation {
                index: block.index,
                violation,
            });
        }
        if let Some(store) = &self.store {
            store.append(&block)?;
        }

        let block = Arc::new(block);
        state.push(Arc::clone(&block));
        Ok(block)
    }

    fn ensure_writable(&self) -> Result<()> {
        match *self.alarm.lock() {
            Some((index, violation)) => Err(LedgerError::IntegrityViolation { index, violation }),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Full-chain integrity scan over the blocks present at call time.
    ///
    /// Returns `(true, None)` or `(false, Some(first offending index))`.  A
    /// failure raises the alarm and the chain stops accepting writes.
    pub fn validate(&self) -> (bool, Option<u64>) {
        let snapshot = self.blocks();
        match self.scan(&snapshot) {
            None => (true, None),
            Some((index, _)) => (false, Some(index)),
        }
    }

    /// Like [`validate`](Self::validate) but reports the violated invariant.
    pub fn verify(&self) -> Result<()> {
        let snapshot = self.blocks();
        match self.scan(&snapshot) {
            None => Ok(()),
            Some((index, violation)) => Err(LedgerError::IntegrityViolation { index, violation }),
        }
    }

    fn scan(&self, snapshot: &[Arc<Block>]) -> Option<(u64, Violation)> {
        let Some(found) = integrity::first_violation(snapshot.iter().map(|b| b.as_ref()), self.difficulty())
        else {
            // An undecodable stored tail lies past the loaded prefix.
            return self
                .alarm()
                .filter(|(index, _)| *index >= snapshot.len() as u64);
        };
        let mut alarm = self.alarm.lock();
        if alarm.is_none() {
            error!(index = found.0, violation = %found.1, "integrity violation; ledger is now read-only");
            *alarm = Some(found);
        }
        Some(found)
    }

    /// Blocks whose payload references `product_id`, ascending by index.
    ///
    /// The returned iterator is bounded by the chain length at call time and
    /// fetches blocks lazily.  Unknown products yield an empty iterator.
    pub fn history(&self, product_id: u64) -> History<'_> {
        let positions: Arc<[u64]> = self
            .state
            .read()
            .by_product
            .get(&product_id)
            .map(|v| Arc::from(v.as_slice()))
            .unwrap_or_else(|| Arc::from(Vec::new()));
        History {
            chain: self,
            positions,
            cursor: 0,
        }
    }

    pub fn info(&self) -> LedgerInfo {
        let chain = self.blocks();
        let is_valid = self.scan(&chain).is_none();
        LedgerInfo {
            is_valid,
            chain_length: chain.len() as u64,
            difficulty: self.difficulty(),
            chain,
        }
    }

    #[cfg(test)]
    pub(crate) fn tamper(&self, index: u64, f: impl FnOnce(&mut Block)) {
        let mut state = self.state.write();
        let slot = &mut state.blocks[index as usize];
        f(Arc::make_mut(slot));
    }
}

// ---------------------------------------------------------------------------
// History iterator
// ---------------------------------------------------------------------------

/// Lazy, restartable walk over one product's blocks.
#[derive(Debug, Clone)]
pub struct History<'a> {
    chain: &'a Chain,
    positions: Arc<[u64]>,
    cursor: usize,
}

impl History<'_> {
    /// Start again from the first matching block.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Indices this walk will visit, in order.
    pub fn indices(&self) -> &[u64] {
        &self.positions
    }
}

impl Iterator for History<'_> {
    type Item = Arc<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let pos = *self.positions.get(self.cursor)?;
        self.cursor += 1;
        self.chain.block(pos)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.positions.len() - self.cursor;
        (rest, Some(rest))
    }
}

impl ExactSizeIterator for History<'_> {}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
