use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub state: StateConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    /// Registered source databases, keyed by db_key.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    /// SQLite file holding vectorization state records.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Vector index backend: `memory` or `qdrant`.
    #[serde(default = "default_index_backend")]
    pub backend: String,
    /// Base URL of the Qdrant instance (required for the qdrant backend).
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the index API key, if any.
    #[serde(default = "default_index_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Prefix for per-database shard collection names.
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,
    /// JSON file persisting the db_key → shard mapping.
    #[serde(default = "default_mapping_path")]
    pub mapping_path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            url: None,
            api_key_env: default_index_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            collection_prefix: default_collection_prefix(),
            mapping_path: default_mapping_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Embedding provider: `http` or `local` (requires the
    /// `local-embeddings-fastembed` feature).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the provider API key, if any.
    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,
    /// Embedding dimension D. Every shard collection is created with this.
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Maximum entries held by the in-memory embedding cache.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    /// Bounded worker pool size for embedding during a sync.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            endpoint: None,
            api_key_env: default_embedding_api_key_env(),
            dims: default_dims(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            cache_size: default_cache_size(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Points accumulated before an index upsert is flushed.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Bounded retries around transient index upsert failures.
    #[serde(default = "default_upsert_retries")]
    pub upsert_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            upsert_retries: default_upsert_retries(),
        }
    }
}

/// One source database entry: a JSON document directory on disk.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceEntry {
    /// Human-readable database name (carried into point metadata).
    pub name: String,
    /// Directory with one subdirectory per collection.
    pub root: PathBuf,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_index_backend() -> String {
    "memory".to_string()
}
fn default_index_api_key_env() -> String {
    "QDRANT_API_KEY".to_string()
}
fn default_collection_prefix() -> String {
    "synapse_".to_string()
}
fn default_mapping_path() -> PathBuf {
    PathBuf::from("./.synx/shards.json")
}
fn default_embedding_provider() -> String {
    "http".to_string()
}
fn default_embedding_api_key_env() -> String {
    "EMBEDDING_API_KEY".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}
fn default_cache_size() -> usize {
    10_000
}
fn default_concurrency() -> usize {
    4
}
fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}
fn default_batch_size() -> usize {
    100
}
fn default_upsert_retries() -> u32 {
    3
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking — an overlap at or beyond the chunk size would stop
    // the window from advancing.
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.overlap,
            config.chunking.chunk_size
        );
    }

    // Validate embedding
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.concurrency == 0 {
        anyhow::bail!("embedding.concurrency must be >= 1");
    }
    match config.embedding.provider.as_str() {
        "http" => {
            if config.embedding.endpoint.is_none() {
                anyhow::bail!("embedding.endpoint must be set for the http provider");
            }
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be set for the http provider");
            }
        }
        "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be http or local.",
            other
        ),
    }

    // Validate index
    match config.index.backend.as_str() {
        "memory" => {}
        "qdrant" => {
            if config.index.url.is_none() {
                anyhow::bail!("index.url must be set for the qdrant backend");
            }
        }
        other => anyhow::bail!("Unknown index backend: '{}'. Must be memory or qdrant.", other),
    }

    // Validate sync
    if config.sync.batch_size == 0 {
        anyhow::bail!("sync.batch_size must be > 0");
    }

    Ok(config)
}
