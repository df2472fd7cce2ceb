//! Single-block integrity checks.
//!
//! [`validate_block`] is the one place that decides whether a block may sit
//! at a given position of the chain.  It runs for every block during a full
//! scan, for every block committed by this process, and for every block
//! loaded from storage or a backup.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::block::{meets_difficulty, Block, BlockData, GENESIS_TIMESTAMP};

/// The invariant a block broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    /// Stored hash differs from the recomputed one, or the payload no
    /// longer encodes.
    HashMismatch,
    /// `previous_hash` does not name the predecessor.
    BrokenLink,
    /// Index is not the expected position.
    IndexGap,
    /// Block 0 is not the fixed genesis marker at the genesis timestamp.
    InvalidGenesis,
    /// Hash lacks the required leading zeros.
    InsufficientWork,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::HashMismatch => "stored hash does not match recomputed hash",
            Self::BrokenLink => "previous_hash does not match predecessor",
            Self::IndexGap => "index is not contiguous",
            Self::InvalidGenesis => "block 0 is not the genesis marker block",
            Self::InsufficientWork => "hash does not meet proof-of-work difficulty",
        })
    }
}

/// Check `block` against its expected position.
///
/// Checks run in a fixed order (hash, link, index, genesis content, work)
/// and the first failure is returned.
pub fn validate_block(
    block: &Block,
    expected_previous_hash: &str,
    expected_index: u64,
    difficulty: u32,
) -> Result<(), Violation> {
    match block.compute_hash() {
        Ok(h) if h == block.hash => {}
        _ => return Err(Violation::HashMismatch),
    }
    if block.previous_hash != expected_previous_hash {
        return Err(Violation::BrokenLink);
    }
    if block.index != expected_index {
        return Err(Violation::IndexGap);
    }
    if expected_index == 0
        && (block.timestamp != GENESIS_TIMESTAMP || block.data != BlockData::genesis())
    {
        return Err(Violation::InvalidGenesis);
    }
    if !meets_difficulty(&block.hash, difficulty) {
        return Err(Violation::InsufficientWork);
    }
    Ok(())
}

/// Walk `blocks` from the start and return the first offending position.
pub fn first_violation<'a, I>(blocks: I, difficulty: u32) -> Option<(u64, Violation)>
where
    I: IntoIterator<Item = &'a Block>,
{
    let mut expected_prev = crate::block::GENESIS_PREVIOUS_HASH;
    for (pos, block) in blocks.into_iter().enumerate() {
        let pos = pos as u64;
        if let Err(v) = validate_block(block, expected_prev, pos, difficulty) {
            return Some((pos, v));
        }
        expected_prev = &block.hash;
    }
    None
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
