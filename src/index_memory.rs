//! In-memory vector index.
//!
//! Backs tests and the `memory` index backend. Points keep insertion order
//! (so scroll pagination is deterministic) and every upsert's batch size is
//! recorded, which lets tests assert batch-boundary behavior exactly.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::index::{CollectionInfo, PointFilter, ScrollPage, ScrolledPoint, VectorIndex};
use crate::models::VectorPoint;

struct MemoryCollection {
    dimension: usize,
    points: Vec<VectorPoint>,
}

/// Process-local [`VectorIndex`] backend.
#[derive(Default)]
pub struct MemoryIndex {
    collections: RwLock<HashMap<String, MemoryCollection>>,
    upsert_log: RwLock<Vec<usize>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch sizes of every upsert, in call order.
    pub fn upsert_batch_sizes(&self) -> Vec<usize> {
        self.upsert_log.read().expect("memory index lock").clone()
    }

    /// All point ids currently in a collection, in insertion order.
    pub fn point_ids(&self, name: &str) -> Vec<String> {
        self.collections
            .read()
            .expect("memory index lock")
            .get(name)
            .map(|c| c.points.iter().map(|p| p.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Count points matching a filter.
    pub fn count_matching(&self, name: &str, filter: &PointFilter) -> usize {
        self.collections
            .read()
            .expect("memory index lock")
            .get(name)
            .map(|c| {
                c.points
                    .iter()
                    .filter(|p| filter.matches(&p.payload))
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let mut collections = self.collections.write().expect("memory index lock");
        if collections.contains_key(name) {
            bail!("collection '{}' already exists", name);
        }
        collections.insert(
            name.to_string(),
            MemoryCollection {
                dimension,
                points: Vec::new(),
            },
        );
        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        Ok(self
            .collections
            .read()
            .expect("memory index lock")
            .get(name)
            .map(|c| CollectionInfo {
                dimension: c.dimension,
                point_count: c.points.len() as u64,
                status: "green".to_string(),
            }))
    }

    async fn upsert(&self, name: &str, points: &[VectorPoint]) -> Result<()> {
        let mut collections = self.collections.write().expect("memory index lock");
        let collection = match collections.get_mut(name) {
            Some(c) => c,
            None => bail!("collection '{}' does not exist", name),
        };
        for point in points {
            if point.vector.len() != collection.dimension {
                bail!(
                    "point dimension {} does not match collection dimension {}",
                    point.vector.len(),
                    collection.dimension
                );
            }
            match collection.points.iter_mut().find(|p| p.id == point.id) {
                Some(existing) => *existing = point.clone(),
                None => collection.points.push(point.clone()),
            }
        }
        self.upsert_log
            .write()
            .expect("memory index lock")
            .push(points.len());
        Ok(())
    }

    async fn scroll(
        &self,
        name: &str,
        filter: &PointFilter,
        offset: Option<String>,
        limit: usize,
        with_payload: bool,
    ) -> Result<ScrollPage> {
        let collections = self.collections.read().expect("memory index lock");
        let collection = match collections.get(name) {
            Some(c) => c,
            None => bail!("collection '{}' does not exist", name),
        };

        let start: usize = offset
            .as_deref()
            .map(|s| s.parse::<usize>())
            .transpose()?
            .unwrap_or(0);
        let matching: Vec<&VectorPoint> = collection
            .points
            .iter()
            .filter(|p| filter.matches(&p.payload))
            .collect();

        let page: Vec<ScrolledPoint> = matching
            .iter()
            .skip(start)
            .take(limit)
            .map(|p| ScrolledPoint {
                id: p.id.clone(),
                payload: with_payload.then(|| p.payload.clone()),
            })
            .collect();

        let consumed = start + page.len();
        let next_offset = (consumed < matching.len()).then(|| consumed.to_string());

        Ok(ScrollPage {
            points: page,
            next_offset,
        })
    }

    async fn delete_points(&self, name: &str, ids: &[String]) -> Result<()> {
        let mut collections = self.collections.write().expect("memory index lock");
        if let Some(collection) = collections.get_mut(name) {
            collection.points.retain(|p| !ids.contains(&p.id));
        }
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections
            .write()
            .expect("memory index lock")
            .remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PointMetadata, PointPayload};
    use chrono::Utc;

    fn point(id: &str, db_key: &str, collection: &str) -> VectorPoint {
        VectorPoint {
            id: id.to_string(),
            vector: vec![0.0, 1.0],
            payload: PointPayload {
                db_key: db_key.to_string(),
                source_collection: collection.to_string(),
                source_doc_id: "doc".to_string(),
                chunk_index: 0,
                text: "text".to_string(),
                metadata: PointMetadata {
                    text_fields: vec![],
                    db_name: "db".to_string(),
                },
                created_at: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn scroll_paginates_filtered_points() {
        let index = MemoryIndex::new();
        index.create_collection("shard", 2).await.unwrap();

        let points: Vec<VectorPoint> = (0..5)
            .map(|i| point(&format!("p{}", i), "primary", "notes"))
            .collect();
        index.upsert("shard", &points).await.unwrap();
        index
            .upsert("shard", &[point("other", "primary", "todos")])
            .await
            .unwrap();

        let filter = PointFilter::for_collection("primary", "notes");
        let first = index
            .scroll("shard", &filter, None, 3, false)
            .await
            .unwrap();
        assert_eq!(first.points.len(), 3);
        let second = index
            .scroll("shard", &filter, first.next_offset, 3, false)
            .await
            .unwrap();
        assert_eq!(second.points.len(), 2);
        assert!(second.next_offset.is_none());
    }

    #[tokio::test]
    async fn upsert_rejects_dimension_mismatch() {
        let index = MemoryIndex::new();
        index.create_collection("shard", 3).await.unwrap();
        let err = index
            .upsert("shard", &[point("p0", "primary", "notes")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dimension"));
    }

    #[tokio::test]
    async fn upsert_overwrites_by_id() {
        let index = MemoryIndex::new();
        index.create_collection("shard", 2).await.unwrap();
        index
            .upsert("shard", &[point("p0", "primary", "notes")])
            .await
            .unwrap();
        index
            .upsert("shard", &[point("p0", "primary", "notes")])
            .await
            .unwrap();
        assert_eq!(index.point_ids("shard").len(), 1);
        assert_eq!(index.upsert_batch_sizes(), vec![1, 1]);
    }
}
