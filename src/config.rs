//! TOML configuration file support.
//!
//! Loads from (in order):
//! 1. an explicit path (`--config`)
//! 2. `provchain.toml` next to the executable
//! 3. `~/.config/provchain/config.toml`
//! 4. built-in defaults
//!
//! Environment variables override file values; CLI arguments override both.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{LedgerError, Result, ResultExt as _};

/// Highest difficulty a SHA-256 hex digest can satisfy.
pub const MAX_DIFFICULTY: u32 = 64;

// ---------------------------------------------------------------------------
// Config structs (map 1-to-1 with the TOML sections)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvchainConfig {
    pub ledger: LedgerConfig,
    pub paths: PathsConfig,
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
}

/// Proof-of-work and append settings shared by every chain instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Required leading zero hex characters in every block hash.
    pub difficulty: u32,
    /// Nonces tried before mining gives up with a timeout.
    pub max_attempts: u64,
    /// Re-mines allowed after losing the append race.
    pub max_append_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub db: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Known product identifiers.  Empty means every non-zero id is accepted.
    pub product_ids: Vec<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Path to a JSON-lines log file.  Empty string means no file logging.
    pub json_log_file: String,
    /// Emit JSON to stdout instead of human-readable stderr output.
    pub json_stdout: bool,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: 2,
            max_attempts: 50_000_000,
            max_append_retries: 16,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            db: PathBuf::from("provchain-ledger.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_log_file: String::new(),
            json_stdout: false,
        }
    }
}

impl LedgerConfig {
    pub fn with_difficulty(difficulty: u32) -> Self {
        Self {
            difficulty,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(LedgerError::Config(format!(
                "difficulty {} out of range [0, {MAX_DIFFICULTY}]",
                self.difficulty
            )));
        }
        if self.max_attempts == 0 {
            return Err(LedgerError::Config("max_attempts must be positive".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl ProvchainConfig {
    /// Try to load from a specific path.  Returns `Ok(default)` if the file
    /// does not exist; returns `Err` if the file exists but is malformed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .ctx_config(&format!("read config file {}", path.display()))?;
        let cfg: ProvchainConfig = toml::from_str(&text).ctx_config("parse config TOML")?;
        cfg.ledger.validate()?;
        Ok(cfg)
    }

    /// Load config using the standard search order.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }

        if let Ok(exe) = std::env::current_exe() {
            let candidate = exe.with_file_name("provchain.toml");
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }

        if let Some(home) = std::env::var_os("HOME") {
            let candidate = PathBuf::from(home)
                .join(".config")
                .join("provchain")
                .join("config.toml");
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }

        Ok(Self::default())
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(d) = std::env::var("PROVCHAIN_DIFFICULTY") {
            self.ledger.difficulty = d
                .trim()
                .parse()
                .ctx_config("parse PROVCHAIN_DIFFICULTY")?;
        }
        if let Ok(db) = std::env::var("PROVCHAIN_DB") {
            self.paths.db = PathBuf::from(db);
        }
        if let Ok(level) = std::env::var("PROVCHAIN_LOG_LEVEL") {
            self.logging.level = level;
        }
        self.ledger.validate()
    }
}
