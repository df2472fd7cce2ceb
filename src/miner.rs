//! Proof-of-work nonce search.

use std::io::Write as _;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::block::{Block, BlockData, GENESIS_PREVIOUS_HASH, GENESIS_TIMESTAMP};
use crate::canonical;
use crate::error::{LedgerError, Result, ResultExt as _};

/// A block with everything but `nonce` and `hash` decided.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSkeleton {
    pub index: u64,
    pub timestamp: u64,
    pub data: BlockData,
    pub previous_hash: String,
}

impl BlockSkeleton {
    pub fn genesis() -> Self {
        Self {
            index: 0,
            timestamp: GENESIS_TIMESTAMP,
            data: BlockData::genesis(),
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
        }
    }

    /// Split the canonical encoding around the nonce value.
    ///
    /// Canonical key order is `data, index, nonce, previous_hash, timestamp`,
    /// so the nonce digits sit between a fixed prefix and a fixed suffix.
    fn encoding_parts(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let data = canonical::to_canonical_json(&self.data)?;
        let mut prefix = Vec::with_capacity(data.len() + 48);
        prefix.extend_from_slice(b"{\"data\":");
        prefix.extend_from_slice(&data);
        write!(prefix, ",\"index\":{},\"nonce\":", self.index)
            .ctx_serialization("encode index")?;

        let mut suffix = Vec::with_capacity(self.previous_hash.len() + 48);
        suffix.extend_from_slice(b",\"previous_hash\":");
        serde_json::to_writer(&mut suffix, &self.previous_hash)
            .ctx_serialization("encode previous_hash")?;
        write!(suffix, ",\"timestamp\":{}}}", self.timestamp)
            .ctx_serialization("encode timestamp")?;
        Ok((prefix, suffix))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Miner {
    difficulty: u32,
    max_attempts: u64,
}

impl Miner {
    pub fn new(difficulty: u32, max_attempts: u64) -> Self {
        Self {
            difficulty,
            max_attempts,
        }
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn max_attempts(&self) -> u64 {
        self.max_attempts
    }

    /// Search nonces `0, 1, 2, ...` until the block hash carries at least
    /// `difficulty` leading zero hex digits.
    ///
    /// CPU-bound and blocking.  Fails with [`LedgerError::MiningTimeout`]
    /// once `max_attempts` nonces have been tried.
    pub fn mine(&self, skeleton: BlockSkeleton) -> Result<Block> {
        let (prefix, suffix) = skeleton.encoding_parts()?;
        let mut base = Sha256::new();
        base.update(&prefix);

        let mut digits = [0u8; 20];
        for nonce in 0..self.max_attempts {
            let mut h = base.clone();
            h.update(format_decimal(&mut digits, nonce));
            h.update(&suffix);
            let digest: [u8; 32] = h.finalize().into();
            if leading_zero_nibbles(&digest) >= self.difficulty {
                let hash = hex::encode(digest);
                debug!(
                    index = skeleton.index,
                    nonce,
                    attempts = nonce + 1,
                    %hash,
                    "block mined"
                );
                return Ok(Block {
                    index: skeleton.index,
                    timestamp: skeleton.timestamp,
                    data: skeleton.data,
                    previous_hash: skeleton.previous_hash,
                    nonce,
                    hash,
                });
            }
        }
        Err(LedgerError::MiningTimeout {
            attempts: self.max_attempts,
        })
    }
}

/// Number of leading zero hex digits in `digest`.
pub fn leading_zero_nibbles(digest: &[u8]) -> u32 {
    let mut n = 0;
    for &b in digest {
        if b == 0 {
            n += 2;
            continue;
        }
        if b >> 4 == 0 {
            n += 1;
        }
        break;
    }
    n
}

/// Decimal digits of `n`, written right-aligned into `buf`.
fn format_decimal(buf: &mut [u8; 20], mut n: u64) -> &[u8] {
    let mut i = buf.len();
    loop {
        i -= 1;
        buf[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    &buf[i..]
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{meets_difficulty, EventPayload, EventType};

    fn skeleton(index: u64) -> BlockSkeleton {
        BlockSkeleton {
            index,
            timestamp: 1_700_000_000,
            data: BlockData::Event(EventPayload {
                product_id: 42,
                event_type: EventType::Shipped,
                occurred_at: "2024-01-01T00:00:00Z".into(),
                location: Some("Dock \"7\"".into()),
                actor: None,
                notes: None,
                attributes: None,
            }),
            previous_hash: "00ab".into(),
        }
    }

    #[test]
    fn mined_hash_matches_full_recompute() {
        let block = Miner::new(2, 1_000_000).mine(skeleton(3)).unwrap();
        assert_eq!(block.hash, block.compute_hash().unwrap());
        assert!(meets_difficulty(&block.hash, 2));
        assert_eq!(block.index, 3);
        assert_eq!(block.previous_hash, "00ab");
    }

    #[test]
    fn spliced_encoding_equals_canonical() {
        let sk = skeleton(9);
        let (prefix, suffix) = sk.encoding_parts().unwrap();
        let mut spliced = prefix;
        spliced.extend_from_slice(b"12345");
        spliced.extend_from_slice(&suffix);
        let full = crate::block::serialize_fields(
            sk.index,
            sk.timestamp,
            &sk.data,
            &sk.previous_hash,
            12345,
        )
        .unwrap();
        assert_eq!(spliced, full);
    }

    #[test]
    fn nonce_is_smallest_satisfying_value() {
        let sk = skeleton(1);
        let block = Miner::new(1, 1_000_000).mine(sk.clone()).unwrap();
        for nonce in 0..block.nonce {
            let h = crate::block::compute_hash(
                sk.index,
                sk.timestamp,
                &sk.data,
                &sk.previous_hash,
                nonce,
            )
            .unwrap();
            assert!(!meets_difficulty(&h, 1));
        }
    }

    #[test]
    fn difficulty_zero_accepts_first_nonce() {
        let block = Miner::new(0, 1).mine(skeleton(1)).unwrap();
        assert_eq!(block.nonce, 0);
    }

    #[test]
    fn attempt_ceiling_yields_timeout() {
        let err = Miner::new(64, 50).mine(skeleton(1)).unwrap_err();
        assert!(matches!(err, LedgerError::MiningTimeout { attempts: 50 }));
        assert!(err.is_retryable());
    }

    #[test]
    fn leading_nibbles() {
        assert_eq!(leading_zero_nibbles(&[0x00, 0x0f, 0xff]), 3);
        assert_eq!(leading_zero_nibbles(&[0x10]), 0);
        assert_eq!(leading_zero_nibbles(&[0x01]), 1);
        assert_eq!(leading_zero_nibbles(&[0, 0]), 4);
    }

    #[test]
    fn decimal_formatting() {
        let mut buf = [0u8; 20];
        assert_eq!(format_decimal(&mut buf, 0), b"0");
        assert_eq!(format_decimal(&mut buf, 907), b"907");
        assert_eq!(
            format_decimal(&mut buf, u64::MAX),
            u64::MAX.to_string().as_bytes()
        );
    }
}
