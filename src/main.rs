use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use provchain_core::{
    backup,
    catalog::InMemoryCatalog,
    chain::Chain,
    config::{LedgerConfig, ProvchainConfig},
    error::LedgerError,
    recorder::{DomainEvent, EventRecorder},
    store::SqliteStore,
    util,
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "provchain",
    version = util::VERSION,
    about = "Append-only, proof-of-work verified supply-chain event ledger"
)]
struct Cli {
    /// Path to the ledger database (SQLite).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Proof-of-work difficulty for new ledgers (leading zero hex digits).
    #[arg(long, global = true)]
    difficulty: Option<u32>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new ledger database and mine its genesis block.
    Init,

    /// Validate a supply-chain event and append it as a new block.
    Record {
        #[arg(long)]
        product_id: u64,
        /// CREATED, SHIPPED, IN_TRANSIT, RECEIVED, DELIVERED, INSPECTED,
        /// RETURNED, RECALLED or CORRECTED.
        #[arg(long)]
        event_type: String,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// RFC 3339 time of the event; defaults to now.
        #[arg(long)]
        occurred_at: Option<String>,
        /// Extra attributes as a JSON object.
        #[arg(long)]
        attributes: Option<String>,
    },

    /// Record events from a CSV file, stopping at the first failing row.
    RecordCsv {
        #[arg(long)]
        csv: PathBuf,
    },

    /// Print every block that references a product, oldest first.
    History {
        #[arg(long)]
        product_id: u64,
    },

    /// Print the whole ledger with its validity and difficulty.
    Info,

    /// Verify hashes, links, indices and proof-of-work of every block.
    Verify,

    /// Export the ledger to a JSON backup file.
    Export {
        #[arg(long)]
        out: PathBuf,
    },

    /// Import a ledger from a JSON backup into a new database.
    Import {
        #[arg(long)]
        json: PathBuf,
        /// Path for the new database (must not already exist).
        #[arg(long)]
        target_db: PathBuf,
    },

    /// Print version information.
    Version,
}

#[derive(Debug, Serialize)]
struct VerifyReport {
    is_valid: bool,
    chain_length: u64,
    first_invalid_index: Option<u64>,
    violation: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = ProvchainConfig::load(cli.config.as_deref()).context("load config")?;
    cfg.apply_env().context("apply environment overrides")?;
    if let Some(d) = cli.difficulty {
        cfg.ledger.difficulty = d;
        cfg.ledger.validate().context("--difficulty")?;
    }

    init_logging(&cfg.logging)?;

    let db_path = cli.db.unwrap_or(cfg.paths.db.clone());
    util::validate_path(&db_path, "db")?;
    let ledger_cfg = cfg.ledger;

    match cli.cmd {
        Commands::Init => {
            anyhow::ensure!(
                !db_path.exists(),
                "ledger database {} already exists -- will not overwrite",
                db_path.display()
            );
            let store = SqliteStore::create_new(&db_path, ledger_cfg.difficulty)
                .context("create ledger")?;
            let chain = Chain::with_store(&ledger_cfg, Box::new(store)).context("open ledger")?;
            let genesis = chain.genesis().context("mine genesis")?;
            info!(ledger_id = %chain.ledger_id(), "ledger initialized");
            print_json(&serde_json::json!({
                "ledger_id": chain.ledger_id(),
                "difficulty": chain.difficulty(),
                "genesis_hash": genesis.hash,
            }))?;
        }

        Commands::Record {
            product_id,
            event_type,
            location,
            actor,
            notes,
            occurred_at,
            attributes,
        } => {
            let attributes = attributes
                .map(|s| serde_json::from_str::<serde_json::Value>(&s))
                .transpose()
                .context("parse --attributes as JSON")?;
            let chain = open_or_create_chain(&db_path, &ledger_cfg)?;
            let catalog = InMemoryCatalog::from_config(&cfg.catalog.product_ids);
            let receipt = EventRecorder::new(&chain, &catalog)
                .record(DomainEvent {
                    product_id: Some(product_id),
                    event_type,
                    location,
                    actor,
                    notes,
                    occurred_at,
                    attributes,
                })
                .context("record event")?;
            print_json(&receipt)?;
        }

        Commands::RecordCsv { csv } => {
            let csv = util::canonicalize_if_exists(&csv, "csv")?;
            let chain = open_or_create_chain(&db_path, &ledger_cfg)?;
            let catalog = InMemoryCatalog::from_config(&cfg.catalog.product_ids);
            let report = EventRecorder::new(&chain, &catalog)
                .record_csv(&csv)
                .context("record csv")?;
            print_json(&report)?;
            if let (Some(row), Some(err)) = (report.failed_row, report.error) {
                anyhow::bail!("csv row {row} failed: {err}");
            }
        }

        Commands::History { product_id } => {
            let chain = open_chain(&db_path, &ledger_cfg)?;
            let blocks: Vec<_> = chain.history(product_id).collect();
            print_json(&blocks)?;
        }

        Commands::Info => {
            let chain = open_chain(&db_path, &ledger_cfg)?;
            print_json(&chain.info())?;
        }

        Commands::Verify => {
            let chain = open_chain(&db_path, &ledger_cfg)?;
            let result = chain.verify();
            let report = match &result {
                Ok(()) => VerifyReport {
                    is_valid: true,
                    chain_length: chain.len(),
                    first_invalid_index: None,
                    violation: None,
                },
                Err(LedgerError::IntegrityViolation { index, violation }) => VerifyReport {
                    is_valid: false,
                    chain_length: chain.len(),
                    first_invalid_index: Some(*index),
                    violation: Some(violation.to_string()),
                },
                Err(_) => VerifyReport {
                    is_valid: false,
                    chain_length: chain.len(),
                    first_invalid_index: None,
                    violation: None,
                },
            };
            print_json(&report)?;
            match result {
                Ok(()) => info!("ledger verification passed"),
                Err(e) => {
                    warn!(error = %e, "ledger verification failed");
                    std::process::exit(1);
                }
            }
        }

        Commands::Export { out } => {
            let chain = open_chain(&db_path, &ledger_cfg)?;
            if chain.is_alarmed() {
                warn!("exporting a ledger that failed verification");
            }
            backup::export_chain_json(&chain, &out).context("export ledger")?;
        }

        Commands::Import { json, target_db } => {
            anyhow::ensure!(
                !target_db.exists(),
                "target database {} already exists -- will not overwrite",
                target_db.display()
            );
            let imported =
                backup::import_chain_json(&json, &target_db, &ledger_cfg).context("import ledger")?;
            info!(
                ledger_id = %imported.ledger_id(),
                "ledger imported to {}",
                target_db.display()
            );
            print_json(&serde_json::json!({
                "ledger_id": imported.ledger_id(),
                "chain_length": imported.len(),
            }))?;
        }

        Commands::Version => {
            println!("{}", util::version_string());
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn open_chain(db_path: &Path, cfg: &LedgerConfig) -> Result<Chain> {
    let store = SqliteStore::open_existing(db_path)
        .with_context(|| format!("open ledger {}", db_path.display()))?;
    Chain::with_store(cfg, Box::new(store)).context("load ledger")
}

fn open_or_create_chain(db_path: &Path, cfg: &LedgerConfig) -> Result<Chain> {
    let store = SqliteStore::open_or_create(db_path, cfg.difficulty)
        .with_context(|| format!("open/create ledger {}", db_path.display()))?;
    Chain::with_store(cfg, Box::new(store)).context("load ledger")
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{json}");
    Ok(())
}

fn init_logging(cfg: &provchain_core::config::LoggingConfig) -> Result<()> {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));

    let registry = tracing_subscriber::registry().with(filter);

    if cfg.json_stdout {
        // JSON output to stdout for log pipelines.
        let json_layer = tracing_subscriber::fmt::layer().json();
        registry.with(json_layer).init();
    } else if !cfg.json_log_file.is_empty() {
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.json_log_file)
            .with_context(|| format!("open json log file {}", cfg.json_log_file))?;
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::sync::Mutex::new(log_file));
        let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        registry.with(file_layer).with(console_layer).init();
    } else {
        // Command output owns stdout; human-readable logs go to stderr.
        let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        registry.with(console_layer).init();
    }
    Ok(())
}
