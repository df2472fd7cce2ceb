//! Structured error types for the provchain library.
//!
//! Every public library function returns [`Result<T>`] which carries a
//! [`LedgerError`].  The kinds map one-to-one onto how a caller should react:
//! fix the input, retry, or stop writing and inspect the ledger.

use thiserror::Error;

use crate::integrity::Violation;

// ---------------------------------------------------------------------------
// Primary error enum
// ---------------------------------------------------------------------------

/// Domain-specific error type for the ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Malformed event or unknown product.  The chain was not touched.
    #[error("validation: {0}")]
    Validation(String),

    /// No nonce satisfied the difficulty within the attempt ceiling.
    #[error("mining timeout: no valid nonce within {attempts} attempts")]
    MiningTimeout { attempts: u64 },

    /// Lost the optimistic append race on every attempt.
    #[error("append conflict: chain tail moved during mining ({retries} retries exhausted)")]
    AppendConflict { retries: u32 },

    /// Payload cannot be canonically encoded.
    #[error("serialization: {0}")]
    Serialization(String),

    /// A stored block failed verification.  The ledger is read-only from here on.
    #[error("integrity violation at block {index}: {violation}")]
    IntegrityViolation { index: u64, violation: Violation },

    #[error("storage: {0}")]
    Storage(String),

    #[error("config: {0}")]
    Config(String),

    /// Direct database errors (auto-converted via `?` in the store module).
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),
}

impl LedgerError {
    /// Whether repeating the same call may succeed without changing its input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::MiningTimeout { .. } | Self::AppendConflict { .. }
        )
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, LedgerError>;

// ---------------------------------------------------------------------------
// Context extension trait
// ---------------------------------------------------------------------------

/// Extension trait that adds subsystem context to any `Result<T, E>`.
///
/// ```ignore
/// std::fs::read(path).ctx_storage("read backup file")?;
/// ```
pub trait ResultExt<T> {
    fn ctx_storage(self, msg: &str) -> Result<T>;
    fn ctx_config(self, msg: &str) -> Result<T>;
    fn ctx_serialization(self, msg: &str) -> Result<T>;
    fn ctx_validation(self, msg: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn ctx_storage(self, msg: &str) -> Result<T> {
        self.map_err(|e| LedgerError::Storage(format!("{msg}: {e}")))
    }
    fn ctx_config(self, msg: &str) -> Result<T> {
        self.map_err(|e| LedgerError::Config(format!("{msg}: {e}")))
    }
    fn ctx_serialization(self, msg: &str) -> Result<T> {
        self.map_err(|e| LedgerError::Serialization(format!("{msg}: {e}")))
    }
    fn ctx_validation(self, msg: &str) -> Result<T> {
        self.map_err(|e| LedgerError::Validation(format!("{msg}: {e}")))
    }
}

/// Same as [`ResultExt`] but for `Option<T>` (converts `None` into an error).
pub trait OptionExt<T> {
    fn required_validation(self, msg: &str) -> Result<T>;
    fn required_storage(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn required_validation(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| LedgerError::Validation(msg.to_string()))
    }
    fn required_storage(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| LedgerError::Storage(msg.to_string()))
    }
}
