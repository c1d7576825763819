//! Vector index boundary.
//!
//! [`VectorIndex`] abstracts the remote vector store: collection lifecycle,
//! batched point upserts, filtered scroll enumeration, and point deletion.
//! Backends: [`MemoryIndex`](crate::index_memory::MemoryIndex) for tests and
//! [`QdrantIndex`](crate::index_qdrant::QdrantIndex) for production.
//!
//! Payload filters match on `db_key` and `source_collection` — the two keys
//! every point carries — so one shard collection can hold points from many
//! source collections and still be cleared per collection.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{PointPayload, VectorPoint};

/// Live info about one index collection.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub dimension: usize,
    pub point_count: u64,
    pub status: String,
}

/// Payload match conditions, ANDed together. Empty filter matches all points.
#[derive(Debug, Clone, Default)]
pub struct PointFilter {
    pub db_key: Option<String>,
    pub source_collection: Option<String>,
}

impl PointFilter {
    pub fn for_collection(db_key: &str, source_collection: &str) -> Self {
        Self {
            db_key: Some(db_key.to_string()),
            source_collection: Some(source_collection.to_string()),
        }
    }

    pub fn matches(&self, payload: &PointPayload) -> bool {
        if let Some(db_key) = &self.db_key {
            if &payload.db_key != db_key {
                return false;
            }
        }
        if let Some(coll) = &self.source_collection {
            if &payload.source_collection != coll {
                return false;
            }
        }
        true
    }
}

/// One point returned from a scroll page. The payload is present only when
/// requested.
#[derive(Debug, Clone)]
pub struct ScrolledPoint {
    pub id: String,
    pub payload: Option<PointPayload>,
}

/// One page of a scroll; `next_offset` is `None` on the last page.
#[derive(Debug, Clone)]
pub struct ScrollPage {
    pub points: Vec<ScrolledPoint>,
    pub next_offset: Option<String>,
}

/// Boundary to the remote vector store.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create a collection with the given dimension, cosine metric, and the
    /// payload indexes the engine's filtered deletes and scrolls rely on.
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()>;

    /// Fetch collection info; `None` when the collection does not exist.
    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>>;

    /// Insert or overwrite a batch of points.
    async fn upsert(&self, name: &str, points: &[VectorPoint]) -> Result<()>;

    /// Enumerate points matching a filter, one page at a time.
    async fn scroll(
        &self,
        name: &str,
        filter: &PointFilter,
        offset: Option<String>,
        limit: usize,
        with_payload: bool,
    ) -> Result<ScrollPage>;

    /// Delete points by id.
    async fn delete_points(&self, name: &str, ids: &[String]) -> Result<()>;

    /// Drop a whole collection. Missing collections are not an error.
    async fn delete_collection(&self, name: &str) -> Result<()>;
}
