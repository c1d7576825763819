//! # Synapse Sync CLI (`synx`)
//!
//! The `synx` binary drives the vector lifecycle engine: initializing state,
//! syncing source collections into their shard collections, checking drift,
//! and clearing vectors.
//!
//! ## Usage
//!
//! ```bash
//! synx --config ./config/synx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `synx init` | Create the state database and every database's shard collection |
//! | `synx sync <db> <collection>` | Sync one source collection |
//! | `synx sync-all` | Fan out across all databases and collections |
//! | `synx status` | Per-collection drift report |
//! | `synx clear` | Delete vectors (and state) for a collection, database, or everything |
//! | `synx stats` | Cross-shard vector statistics |
//! | `synx cache stats\|clear` | Embedding cache statistics / reset |
//! | `synx usage` | Embedding call counters |

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use synapse_sync::config;
use synapse_sync::progress::ProgressMode;
use synapse_sync::source::{auto_detect_text_fields, DocumentSource};
use synapse_sync::sync::{CancelToken, Engine, SyncAllRequest, SyncRequest};

/// Synapse Sync — keeps remote vector indexes in sync with source document
/// stores.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file with the state path, index backend, embedding provider, and source
/// databases.
#[derive(Parser)]
#[command(
    name = "synx",
    about = "Synapse Sync — a vector lifecycle engine for document stores",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/synx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the state database and shard collections.
    ///
    /// Creates the SQLite state file, runs schema migrations, and lazily
    /// creates a shard collection for every configured database. Idempotent.
    Init,

    /// Sync one source collection into its database's shard.
    ///
    /// Skips work when the collection is already up to date; use `--force`
    /// to clear and rebuild unconditionally.
    Sync {
        /// Source database key (as configured under `[sources.<key>]`).
        db_key: String,

        /// Source collection name.
        collection: String,

        /// Comma-separated text fields to embed. Auto-detected from a
        /// sampled document when omitted.
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,

        /// Window size in characters.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Window overlap in characters (must be smaller than chunk size).
        #[arg(long)]
        overlap: Option<usize>,

        /// Points per index upsert.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Maximum number of documents to process.
        #[arg(long)]
        max_documents: Option<usize>,

        /// Clear existing vectors and rebuild, regardless of state.
        #[arg(long)]
        force: bool,

        /// Progress output: `off`, `human`, or `json`. Defaults to human
        /// when stderr is a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Sync every collection of every database (or the given databases).
    ///
    /// Text fields are auto-detected per collection from a sampled document.
    /// Per-collection errors are reported but do not stop the fan-out.
    SyncAll {
        /// Restrict to these database keys (repeatable).
        #[arg(long = "db")]
        db_keys: Vec<String>,

        /// Use the fixed fallback field list instead of sampling.
        #[arg(long)]
        no_auto_detect: bool,

        /// Force a clear-and-rebuild for every collection.
        #[arg(long)]
        force: bool,

        /// Maximum documents per collection.
        #[arg(long)]
        max_documents: Option<usize>,
    },

    /// Show which collections need syncing and why.
    Status {
        /// Restrict to one database key.
        #[arg(long = "db")]
        db_key: Option<String>,

        /// Restrict to one collection.
        #[arg(long)]
        collection: Option<String>,
    },

    /// Clear vectors and their state records.
    ///
    /// With `--db` and `--collection`, deletes that pair's points by payload
    /// filter. With only `--db`, drops and recreates the database's whole
    /// shard collection. With neither, resets every database.
    Clear {
        #[arg(long = "db")]
        db_key: Option<String>,

        #[arg(long)]
        collection: Option<String>,
    },

    /// Cross-shard vector statistics.
    Stats,

    /// Embedding cache management.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Embedding call counters.
    Usage {
        /// Reset the counters after printing them.
        #[arg(long)]
        reset: bool,
    },
}

/// Cache management subcommands.
#[derive(Subcommand)]
enum CacheAction {
    /// Print cache size and hit rate.
    Stats,
    /// Drop every cached embedding.
    Clear,
}

fn parse_progress(mode: Option<&str>) -> anyhow::Result<ProgressMode> {
    Ok(match mode {
        None => ProgressMode::default_for_tty(),
        Some("off") => ProgressMode::Off,
        Some("human") => ProgressMode::Human,
        Some("json") => ProgressMode::Json,
        Some(other) => anyhow::bail!("Unknown progress mode: '{}'", other),
    })
}

/// A token that flips to cancelled on Ctrl-C, so long syncs abort at their
/// next suspension point instead of being killed mid-batch.
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling...");
            handle.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let engine = Arc::new(Engine::from_config(&cfg).await?);

    match cli.command {
        Commands::Init => {
            engine.ensure_shards().await?;
            println!("State database and shard collections initialized.");
        }
        Commands::Sync {
            db_key,
            collection,
            fields,
            chunk_size,
            overlap,
            batch_size,
            max_documents,
            force,
            progress,
        } => {
            let text_fields = if fields.is_empty() {
                detect_fields(&engine, &db_key, &collection).await?
            } else {
                fields
            };

            let req = SyncRequest {
                db_key,
                collection,
                text_fields,
                chunk_size: chunk_size.unwrap_or(cfg.chunking.chunk_size),
                overlap: overlap.unwrap_or(cfg.chunking.overlap),
                batch_size: batch_size.unwrap_or(cfg.sync.batch_size),
                max_documents,
                force,
            };

            let reporter = parse_progress(progress.as_deref())?.reporter();
            let cancel = cancel_on_ctrl_c();
            let report = engine.sync(&req, reporter.as_ref(), &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::SyncAll {
            db_keys,
            no_auto_detect,
            force,
            max_documents,
        } => {
            let req = SyncAllRequest {
                db_keys: (!db_keys.is_empty()).then_some(db_keys),
                auto_detect_fields: !no_auto_detect,
                force,
                max_documents_per_collection: max_documents,
            };
            let cancel = cancel_on_ctrl_c();
            let report = engine.sync_all(&req, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Status { db_key, collection } => {
            let statuses = engine
                .check_status(db_key.as_deref(), collection.as_deref())
                .await?;
            if statuses.is_empty() {
                println!("No non-empty collections found.");
            }
            for status in &statuses {
                let marker = if status.needs_sync { "!" } else { "ok" };
                println!(
                    "[{}] {}.{}  docs={} vectors={} reason={}",
                    marker,
                    status.db_key,
                    status.collection,
                    status.document_count,
                    status.vector_count,
                    status.reason.as_str(),
                );
            }
        }
        Commands::Clear { db_key, collection } => {
            let report = engine
                .clear_vectors(db_key.as_deref(), collection.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Stats => {
            let stats = engine.vector_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats => {
                println!("{}", serde_json::to_string_pretty(&engine.cache_stats())?);
            }
            CacheAction::Clear => {
                let cleared = engine.clear_cache();
                println!("Cleared {} cached embeddings.", cleared);
            }
        },
        Commands::Usage { reset } => {
            println!("{}", serde_json::to_string_pretty(&engine.usage())?);
            if reset {
                engine.reset_usage();
                println!("Counters reset.");
            }
        }
    }

    Ok(())
}

/// Sample one document and auto-detect its text fields, failing when the
/// collection is empty or has no usable fields.
async fn detect_fields(
    engine: &Engine,
    db_key: &str,
    collection: &str,
) -> anyhow::Result<Vec<String>> {
    let source = engine.source(db_key)?;
    let sample = source.find(collection, Some(1)).await?;
    let fields = sample
        .first()
        .map(auto_detect_text_fields)
        .unwrap_or_default();
    if fields.is_empty() {
        anyhow::bail!(
            "No text fields detected in '{}'; pass --fields explicitly",
            collection
        );
    }
    Ok(fields)
}
