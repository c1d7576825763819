//! Per-database shard resolution.
//!
//! Every source database gets one dedicated index collection (its *shard*),
//! named `<prefix><db_key>`. The mapping is persisted to a JSON file so shard
//! names survive restarts, and each entry pins the embedding dimension the
//! shard was created with.
//!
//! A dimension mismatch between the mapping and the live collection forces a
//! destructive recreate: the old collection is dropped, everything in it is
//! lost, and every source collection in that database must be resynced. The
//! warning is logged before the drop.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::index::VectorIndex;
use crate::models::ShardMapping;

/// On-disk shape of the shard mapping file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ShardFile {
    clusters: BTreeMap<String, ShardMapping>,
}

/// Resolves db_keys to shard collection names, persisting lazily created
/// mappings.
pub struct ShardResolver {
    path: PathBuf,
    prefix: String,
    dimension: usize,
    clusters: Mutex<BTreeMap<String, ShardMapping>>,
}

impl ShardResolver {
    /// Load the mapping file (or start empty when it does not exist).
    pub fn load(path: impl Into<PathBuf>, prefix: impl Into<String>, dimension: usize) -> Result<Self> {
        let path = path.into();
        let clusters = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read shard mapping: {}", path.display()))?;
            let file: ShardFile = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse shard mapping: {}", path.display()))?;
            file.clusters
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            prefix: prefix.into(),
            dimension,
            clusters: Mutex::new(clusters),
        })
    }

    /// The dimension every shard is created with.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Snapshot of all known mappings.
    pub fn mappings(&self) -> BTreeMap<String, ShardMapping> {
        self.lock().clone()
    }

    /// Resolve the shard collection name for a db_key, creating and
    /// persisting the mapping on first reference. Idempotent.
    pub fn resolve(&self, db_key: &str) -> Result<String, EngineError> {
        let mut clusters = self.lock();
        if let Some(mapping) = clusters.get(db_key) {
            return Ok(mapping.collection_name.clone());
        }

        let collection_name = format!("{}{}", self.prefix, db_key);
        clusters.insert(
            db_key.to_string(),
            ShardMapping {
                collection_name: collection_name.clone(),
                dimension: self.dimension,
                created_at: Utc::now(),
                vector_count: 0,
            },
        );
        self.persist(&clusters)?;
        Ok(collection_name)
    }

    /// Make sure the shard collection exists in the index with the right
    /// dimension, creating it (or destructively recreating it) as needed.
    /// Returns the shard name.
    ///
    /// Any creation failure is fatal to the calling sync: a mapping must
    /// never reference a collection that does not exist.
    pub async fn ensure_exists(
        &self,
        index: &dyn VectorIndex,
        db_key: &str,
    ) -> Result<String, EngineError> {
        let name = self.resolve(db_key)?;

        let info = index
            .collection_info(&name)
            .await
            .map_err(EngineError::Index)?;

        match info {
            Some(info) if info.dimension != self.dimension => {
                warn!(
                    shard = %name,
                    expected = self.dimension,
                    actual = info.dimension,
                    "shard dimension mismatch; dropping and recreating — all points for this database are lost and must be resynced"
                );
                index
                    .delete_collection(&name)
                    .await
                    .map_err(EngineError::Index)?;
                index
                    .create_collection(&name, self.dimension)
                    .await
                    .map_err(EngineError::Index)?;
                self.set_vector_count(db_key, 0)?;
            }
            Some(_) => {}
            None => {
                info!(shard = %name, dimension = self.dimension, "creating shard collection");
                index
                    .create_collection(&name, self.dimension)
                    .await
                    .map_err(EngineError::Index)?;
            }
        }

        Ok(name)
    }

    /// Refresh the cached point count for a shard.
    pub fn set_vector_count(&self, db_key: &str, count: u64) -> Result<(), EngineError> {
        let mut clusters = self.lock();
        if let Some(mapping) = clusters.get_mut(db_key) {
            mapping.vector_count = count;
            self.persist(&clusters)?;
        }
        Ok(())
    }

    fn persist(&self, clusters: &BTreeMap<String, ShardMapping>) -> Result<(), EngineError> {
        let write = || -> Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = ShardFile {
                clusters: clusters.clone(),
            };
            let content = serde_json::to_string_pretty(&file)?;
            std::fs::write(&self.path, content)
                .with_context(|| format!("Failed to write shard mapping: {}", self.path.display()))?;
            Ok(())
        };
        write().map_err(EngineError::ShardMapping)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, ShardMapping>> {
        self.clusters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_memory::MemoryIndex;
    use std::path::Path;

    fn resolver_at(path: &Path, dimension: usize) -> Result<ShardResolver> {
        ShardResolver::load(path, "synapse_", dimension)
    }

    fn temp_resolver(dimension: usize) -> (tempfile::TempDir, ShardResolver) {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_at(&dir.path().join("shards.json"), dimension).unwrap();
        (dir, resolver)
    }

    #[test]
    fn resolve_is_deterministic_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shards.json");

        let resolver = resolver_at(&path, 384).unwrap();
        assert_eq!(resolver.resolve("primary").unwrap(), "synapse_primary");
        assert_eq!(resolver.resolve("primary").unwrap(), "synapse_primary");

        // A fresh resolver sees the persisted mapping.
        let reloaded = resolver_at(&path, 384).unwrap();
        let mappings = reloaded.mappings();
        assert_eq!(mappings["primary"].collection_name, "synapse_primary");
        assert_eq!(mappings["primary"].dimension, 384);
    }

    #[tokio::test]
    async fn ensure_exists_creates_lazily() {
        let (_dir, resolver) = temp_resolver(4);
        let index = MemoryIndex::new();

        let name = resolver.ensure_exists(&index, "primary").await.unwrap();
        assert_eq!(name, "synapse_primary");
        let info = index.collection_info(&name).await.unwrap().unwrap();
        assert_eq!(info.dimension, 4);

        // Second call is a no-op.
        resolver.ensure_exists(&index, "primary").await.unwrap();
    }

    #[tokio::test]
    async fn dimension_mismatch_recreates_empty() {
        let (_dir, resolver) = temp_resolver(4);
        let index = MemoryIndex::new();

        // Simulate an older shard created with a different dimension.
        index.create_collection("synapse_primary", 8).await.unwrap();

        let name = resolver.ensure_exists(&index, "primary").await.unwrap();
        let info = index.collection_info(&name).await.unwrap().unwrap();
        assert_eq!(info.dimension, 4);
        assert_eq!(info.point_count, 0);
    }
}
