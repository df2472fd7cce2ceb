//! provchain: append-only, proof-of-work verified supply-chain event ledger.
//!
//! This crate provides:
//! - Canonical block encoding, hashing and proof-of-work mining
//! - A thread-safe chain with optimistic mine-then-append and full-chain
//!   integrity verification
//! - Per-product event history and a read-only ledger view
//! - Event validation against a product catalog, including CSV batches
//! - Durable SQLite storage and JSON backup/restore
//!
//! The CLI wrapper lives in `src/main.rs`.

#![deny(unsafe_code)]

pub mod error;
pub mod config;

pub mod backup;
pub mod block;
pub mod canonical;
pub mod catalog;
pub mod chain;
pub mod integrity;
pub mod miner;
pub mod recorder;
pub mod store;
pub mod util;
