//! Hashing helpers, time, and input validation.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::error::{LedgerError, Result};

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    h.finalize().into()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Seconds since the Unix epoch.
pub fn now_unix_secs() -> u64 {
    OffsetDateTime::now_utc().unix_timestamp().max(0) as u64
}

pub fn now_utc_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Parse an RFC 3339 timestamp and re-emit it normalized to UTC.
pub fn normalize_rfc3339(s: &str) -> Result<String> {
    let parsed = OffsetDateTime::parse(s.trim(), &Rfc3339)
        .map_err(|e| LedgerError::Validation(format!("invalid RFC 3339 timestamp '{s}': {e}")))?;
    parsed
        .to_offset(time::UtcOffset::UTC)
        .format(&Rfc3339)
        .map_err(|e| LedgerError::Validation(format!("format timestamp: {e}")))
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Printable text: no ASCII control characters apart from tab and newline.
static TEXT_RE: std::sync::LazyLock<regex::Regex> = std::sync::LazyLock::new(|| {
    regex::Regex::new(r"^[^\x00-\x08\x0B-\x1F\x7F]+$").unwrap()
});

/// Validate a free-text event field (location, actor, notes).
pub fn validate_text(field: &str, value: &str, max_chars: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LedgerError::Validation(format!(
            "{field} must not be blank when present"
        )));
    }
    let chars = value.chars().count();
    if chars > max_chars {
        return Err(LedgerError::Validation(format!(
            "{field} is {chars} chars; at most {max_chars} allowed"
        )));
    }
    if !TEXT_RE.is_match(value) {
        return Err(LedgerError::Validation(format!(
            "{field} contains control characters"
        )));
    }
    Ok(())
}

/// Validate that a path is not empty and does not contain null bytes.
pub fn validate_path(p: &Path, label: &str) -> Result<()> {
    let s = p.to_string_lossy();
    if s.is_empty() {
        return Err(LedgerError::Validation(format!("{label} path is empty")));
    }
    if s.contains('\0') {
        return Err(LedgerError::Validation(format!(
            "{label} path contains null byte"
        )));
    }
    Ok(())
}

/// Canonicalize a path if it exists, otherwise return it unchanged.
pub fn canonicalize_if_exists(p: &Path, label: &str) -> Result<PathBuf> {
    validate_path(p, label)?;
    if p.exists() {
        std::fs::canonicalize(p).map_err(|e| {
            LedgerError::Validation(format!("{label} path invalid: {e}"))
        })
    } else {
        Ok(p.to_path_buf())
    }
}

/// Maximum number of rows allowed in CSV inputs.
pub const MAX_CSV_ROWS: usize = 10_000;

// ---------------------------------------------------------------------------
// Version constants (set by build.rs)
// ---------------------------------------------------------------------------

pub const GIT_HASH: &str = env!("PROVCHAIN_GIT_HASH");
pub const BUILD_TS: &str = env!("PROVCHAIN_BUILD_TS");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One-line version string for display.
pub fn version_string() -> String {
    format!("provchain v{VERSION} (git {GIT_HASH}, built {BUILD_TS})")
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256 of empty string
        let digest = sha256(b"");
        assert_eq!(
            hex::encode(digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn sha256_hex_is_lowercase() {
        let h = sha256_hex(b"hello");
        assert_eq!(
            h,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn rfc3339_normalized_to_utc() {
        let s = normalize_rfc3339("2024-05-01T12:00:00+02:00").unwrap();
        assert_eq!(s, "2024-05-01T10:00:00Z");
        assert!(normalize_rfc3339("yesterday").is_err());
    }

    #[test]
    fn text_validation() {
        assert!(validate_text("location", "Warehouse B, Dock 4", 256).is_ok());
        assert!(validate_text("notes", "line one\nline two", 256).is_ok());
        assert!(validate_text("location", "   ", 256).is_err());
        assert!(validate_text("actor", "bad\u{7}bell", 256).is_err());
        assert!(validate_text("actor", &"x".repeat(300), 256).is_err());
    }

    #[test]
    fn empty_path_rejected() {
        assert!(validate_path(Path::new(""), "db").is_err());
        assert!(validate_path(Path::new("ledger.db"), "db").is_ok());
    }

    #[test]
    fn version_string_non_empty() {
        assert!(version_string().contains("provchain"));
    }
}
