//! Ledger entries and their payloads.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::canonical;
use crate::error::{LedgerError, Result};
use crate::util;

/// `previous_hash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";
/// Payload of the genesis block.  Never produced by a real event.
pub const GENESIS_MARKER: &str = "Genesis Block - Supply Chain Start";
/// Genesis timestamp, fixed so that every ledger at a given difficulty shares it.
pub const GENESIS_TIMESTAMP: u64 = 0;

// ---------------------------------------------------------------------------
// Event payload
// ---------------------------------------------------------------------------

/// Recognized supply-chain event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Created,
    Shipped,
    InTransit,
    Received,
    Delivered,
    Inspected,
    Returned,
    Recalled,
    /// Amends an earlier event; history itself is never rewritten.
    Corrected,
}

impl EventType {
    pub const ALL: [EventType; 9] = [
        Self::Created,
        Self::Shipped,
        Self::InTransit,
        Self::Received,
        Self::Delivered,
        Self::Inspected,
        Self::Returned,
        Self::Recalled,
        Self::Corrected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Shipped => "SHIPPED",
            Self::InTransit => "IN_TRANSIT",
            Self::Received => "RECEIVED",
            Self::Delivered => "DELIVERED",
            Self::Inspected => "INSPECTED",
            Self::Returned => "RETURNED",
            Self::Recalled => "RECALLED",
            Self::Corrected => "CORRECTED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = LedgerError;

    /// Case-insensitive; `-` and spaces are accepted in place of `_`.
    fn from_str(s: &str) -> Result<Self> {
        let norm: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == norm)
            .ok_or_else(|| {
                LedgerError::Validation(format!("unrecognized event_type '{}'", s.trim()))
            })
    }
}

/// Payload recorded for one supply-chain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub product_id: u64,
    pub event_type: EventType,
    /// RFC 3339 UTC.
    pub occurred_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Map<String, serde_json::Value>>,
}

/// What a block carries: the genesis marker or an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockData {
    Event(EventPayload),
    Marker(String),
}

impl BlockData {
    pub fn genesis() -> Self {
        Self::Marker(GENESIS_MARKER.to_string())
    }

    pub fn product_id(&self) -> Option<u64> {
        match self {
            Self::Event(e) => Some(e.product_id),
            Self::Marker(_) => None,
        }
    }

    pub fn as_event(&self) -> Option<&EventPayload> {
        match self {
            Self::Event(e) => Some(e),
            Self::Marker(_) => None,
        }
    }
}

impl From<EventPayload> for BlockData {
    fn from(e: EventPayload) -> Self {
        Self::Event(e)
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    /// Unix epoch seconds at creation.
    pub timestamp: u64,
    pub data: BlockData,
    /// Lowercase hex hash of the predecessor, or `"0"` for genesis.
    pub previous_hash: String,
    pub nonce: u64,
    /// Lowercase hex SHA-256 over the canonical encoding of the fields above.
    pub hash: String,
}

/// The hashed subset of a block.  Field order here is irrelevant; the
/// canonical encoder sorts keys.
#[derive(Serialize)]
struct HashInput<'a> {
    index: u64,
    timestamp: u64,
    data: &'a BlockData,
    previous_hash: &'a str,
    nonce: u64,
}

/// Canonical bytes of `{index, timestamp, data, previous_hash, nonce}`.
pub fn serialize_fields(
    index: u64,
    timestamp: u64,
    data: &BlockData,
    previous_hash: &str,
    nonce: u64,
) -> Result<Vec<u8>> {
    canonical::to_canonical_json(&HashInput {
        index,
        timestamp,
        data,
        previous_hash,
        nonce,
    })
}

/// Lowercase hex SHA-256 of the canonical field encoding.
pub fn compute_hash(
    index: u64,
    timestamp: u64,
    data: &BlockData,
    previous_hash: &str,
    nonce: u64,
) -> Result<String> {
    let bytes = serialize_fields(index, timestamp, data, previous_hash, nonce)?;
    Ok(util::sha256_hex(&bytes))
}

/// True when `hash` starts with at least `difficulty` `'0'` characters.
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let d = difficulty as usize;
    hash.len() >= d && hash.as_bytes()[..d].iter().all(|&b| b == b'0')
}

impl Block {
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        serialize_fields(
            self.index,
            self.timestamp,
            &self.data,
            &self.previous_hash,
            self.nonce,
        )
    }

    /// Recompute the hash from the current field values.
    pub fn compute_hash(&self) -> Result<String> {
        Ok(util::sha256_hex(&self.canonical_bytes()?))
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn product_id(&self) -> Option<u64> {
        self.data.product_id()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn shipped(product_id: u64) -> EventPayload {
        EventPayload {
            product_id,
            event_type: EventType::Shipped,
            occurred_at: "2024-01-01T00:00:00Z".into(),
            location: None,
            actor: None,
            notes: None,
            attributes: None,
        }
    }

    #[test]
    fn event_type_parsing_is_lenient_on_case_and_separator() {
        assert_eq!("shipped".parse::<EventType>().unwrap(), EventType::Shipped);
        assert_eq!("in-transit".parse::<EventType>().unwrap(), EventType::InTransit);
        assert_eq!(" In Transit ".parse::<EventType>().unwrap(), EventType::InTransit);
        assert!("TELEPORTED".parse::<EventType>().is_err());
        assert!("".parse::<EventType>().is_err());
    }

    #[test]
    fn event_type_serde_matches_display() {
        for t in EventType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{t}\""));
        }
    }

    #[test]
    fn canonical_encoding_is_stable() {
        let data = BlockData::from(shipped(42));
        let bytes = serialize_fields(1, 1_700_000_000, &data, "abc", 7).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            concat!(
                r#"{"data":{"event_type":"SHIPPED","occurred_at":"2024-01-01T00:00:00Z","product_id":42},"#,
                r#""index":1,"nonce":7,"previous_hash":"abc","timestamp":1700000000}"#
            )
        );
    }

    #[test]
    fn genesis_marker_encodes_as_string() {
        let bytes = serialize_fields(0, 0, &BlockData::genesis(), "0", 0).unwrap();
        let s = String::from_utf8(bytes).unwrap();
        assert!(s.starts_with(r#"{"data":"Genesis Block - Supply Chain Start","#));
    }

    #[test]
    fn hash_covers_every_field() {
        let data = BlockData::from(shipped(1));
        let base = compute_hash(1, 10, &data, "p", 0).unwrap();
        assert_eq!(base.len(), 64);
        assert_ne!(base, compute_hash(2, 10, &data, "p", 0).unwrap());
        assert_ne!(base, compute_hash(1, 11, &data, "p", 0).unwrap());
        assert_ne!(base, compute_hash(1, 10, &data, "q", 0).unwrap());
        assert_ne!(base, compute_hash(1, 10, &data, "p", 1).unwrap());
        assert_ne!(
            base,
            compute_hash(1, 10, &BlockData::from(shipped(2)), "p", 0).unwrap()
        );
    }

    #[test]
    fn difficulty_predicate() {
        assert!(meets_difficulty("00ab", 2));
        assert!(meets_difficulty("00ab", 0));
        assert!(!meets_difficulty("0a0b", 2));
        assert!(!meets_difficulty("00", 3));
    }

    #[test]
    fn block_data_deserializes_both_shapes() {
        let marker: BlockData = serde_json::from_str("\"Genesis Block - Supply Chain Start\"").unwrap();
        assert_eq!(marker, BlockData::genesis());
        let ev: BlockData = serde_json::from_str(
            r#"{"product_id":5,"event_type":"RECEIVED","occurred_at":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(ev.product_id(), Some(5));
    }
}
