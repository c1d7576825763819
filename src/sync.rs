//! Sync orchestration.
//!
//! [`Engine`] composes the change detector, chunker, embedding generator,
//! shard resolver, and vector index into the full sync flow:
//! decide → (clear) → fetch → chunk → embed → batch-upsert → save state.
//!
//! Everything the engine touches is owned by the engine instance — no
//! process-wide mutable state — so tests and embedders can run independent
//! engines side by side.
//!
//! Concurrency model: syncs for the same (db_key, collection) pair are
//! serialized through a per-key mutex, so at most one sync is in flight per
//! collection. Within a document, chunk embeddings run on a bounded worker
//! pool but complete in chunk order (`buffered` preserves stream order), and
//! a batch is only flushed once every point in it carries a real embedding.
//!
//! State is written only after every batch has been durably upserted. On
//! abort, the index may hold orphaned points the state record does not
//! count; the next fingerprint mismatch triggers a full resync that clears
//! them by payload filter, not by count.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::chunk::{chunk_text, ChunkingParams};
use crate::config::{ChunkingConfig, Config};
use crate::embedding::EmbeddingGenerator;
use crate::error::EngineError;
use crate::index::{PointFilter, VectorIndex};
use crate::models::{
    ClearReport, CollectionStatus, PointMetadata, PointPayload, SyncAction, SyncAllEntry,
    SyncAllReport, SyncReason, SyncReport, SyncStatus, VectorPoint, VectorizationState,
};
use crate::progress::{ChannelProgress, NoProgress, SyncEvent, SyncProgressReporter};
use crate::shard::ShardResolver;
use crate::source::{
    auto_detect_text_fields, build_document_text, DocumentSource, SourceRegistry,
    DEFAULT_TEXT_FIELDS, SYSTEM_COLLECTIONS,
};
use crate::state::{ChangeDetector, StateStore};
use crate::stats::{UsageCounters, UsageStats};

/// Scroll page size used when enumerating points for deletion or stats.
const SCROLL_PAGE: usize = 100;

/// Cooperative cancellation handle, checked at every suspension point.
///
/// Cloning shares the flag: cancel any clone and the running sync aborts
/// with [`EngineError::Cancelled`] at its next checkpoint.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), EngineError> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Parameters for one single-collection sync.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub db_key: String,
    pub collection: String,
    pub text_fields: Vec<String>,
    pub chunk_size: usize,
    pub overlap: usize,
    pub batch_size: usize,
    pub max_documents: Option<usize>,
    pub force: bool,
}

impl SyncRequest {
    /// A request with the stock chunking and batching parameters.
    pub fn new(
        db_key: impl Into<String>,
        collection: impl Into<String>,
        text_fields: Vec<String>,
    ) -> Self {
        Self {
            db_key: db_key.into(),
            collection: collection.into(),
            text_fields,
            chunk_size: 500,
            overlap: 50,
            batch_size: 100,
            max_documents: None,
            force: false,
        }
    }
}

/// Parameters for a fan-out sync across databases and collections.
#[derive(Debug, Clone)]
pub struct SyncAllRequest {
    /// Databases to sync; `None` means every registered database.
    pub db_keys: Option<Vec<String>>,
    /// Sample one document per collection to pick text fields.
    pub auto_detect_fields: bool,
    pub force: bool,
    pub max_documents_per_collection: Option<usize>,
}

impl Default for SyncAllRequest {
    fn default() -> Self {
        Self {
            db_keys: None,
            auto_detect_fields: true,
            force: false,
            max_documents_per_collection: None,
        }
    }
}

/// Engine tuning knobs not tied to a single request.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Bounded worker pool size for embedding calls.
    pub embed_concurrency: usize,
    /// Bounded retries around transient index upsert failures.
    pub upsert_retries: u32,
    /// Stock chunking parameters for fan-out syncs.
    pub chunking: ChunkingConfig,
    /// Stock batch size for fan-out syncs.
    pub batch_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            embed_concurrency: 4,
            upsert_retries: 3,
            chunking: ChunkingConfig::default(),
            batch_size: 100,
        }
    }
}

/// Per-shard summary for [`Engine::vector_stats`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct ShardSummary {
    pub db_key: String,
    pub db_name: String,
    pub collection_name: String,
    pub total_vectors: u64,
}

/// Per-(db_key, collection) vector counts from a payload scroll.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakdownEntry {
    pub db_key: String,
    pub collection: String,
    pub vector_count: u64,
}

/// Cross-shard statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VectorStats {
    pub total_vectors: u64,
    pub vector_dimension: usize,
    pub distance_metric: String,
    pub shards: Vec<ShardSummary>,
    pub breakdown: Vec<BreakdownEntry>,
}

/// The vector lifecycle engine.
pub struct Engine {
    sources: SourceRegistry,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<EmbeddingGenerator>,
    shards: ShardResolver,
    states: StateStore,
    detector: ChangeDetector,
    counters: Arc<UsageCounters>,
    options: EngineOptions,
    /// Single-flight locks keyed by (db_key, collection).
    locks: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl Engine {
    pub fn new(
        sources: SourceRegistry,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<EmbeddingGenerator>,
        shards: ShardResolver,
        states: StateStore,
        counters: Arc<UsageCounters>,
        options: EngineOptions,
    ) -> Self {
        let detector = ChangeDetector::new(states.clone());
        Self {
            sources,
            index,
            embedder,
            shards,
            states,
            detector,
            counters,
            options,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Build an engine from the loaded configuration: directory sources,
    /// the configured index backend, and the configured embedding provider.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        use crate::connector_dir::DirSource;
        use crate::index_memory::MemoryIndex;
        use crate::index_qdrant::QdrantIndex;

        let mut sources = SourceRegistry::new();
        for (db_key, entry) in &config.sources {
            let source = DirSource::new(entry.name.clone(), entry.root.clone())?;
            sources.register(db_key.clone(), Arc::new(source));
        }

        let index: Arc<dyn VectorIndex> = match config.index.backend.as_str() {
            "qdrant" => Arc::new(QdrantIndex::new(&config.index)?),
            _ => Arc::new(MemoryIndex::new()),
        };

        let counters = Arc::new(UsageCounters::new());
        let provider = crate::embedding::create_provider(&config.embedding)?;
        let embedder = Arc::new(EmbeddingGenerator::new(
            provider,
            config.embedding.cache_size,
            counters.clone(),
        ));

        let shards = ShardResolver::load(
            &config.index.mapping_path,
            &config.index.collection_prefix,
            config.embedding.dims,
        )?;

        let pool = crate::db::connect(&config.state.path).await?;
        crate::migrate::run_migrations(&pool).await?;
        let states = StateStore::new(pool);

        Ok(Self::new(
            sources,
            index,
            embedder,
            shards,
            states,
            counters,
            EngineOptions {
                embed_concurrency: config.embedding.concurrency,
                upsert_retries: config.sync.upsert_retries,
                chunking: config.chunking.clone(),
                batch_size: config.sync.batch_size,
            },
        ))
    }

    /// Look up a registered document source by db_key.
    pub fn source(&self, db_key: &str) -> Result<Arc<dyn DocumentSource>, EngineError> {
        self.sources
            .get(db_key)
            .ok_or_else(|| EngineError::DatabaseNotFound(db_key.to_string()))
    }

    fn lock_for(&self, db_key: &str, collection: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry((db_key.to_string(), collection.to_string()))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Make sure every registered database's shard collection exists.
    pub async fn ensure_shards(&self) -> Result<(), EngineError> {
        for db_key in self.sources.keys() {
            self.shards.ensure_exists(self.index.as_ref(), &db_key).await?;
        }
        Ok(())
    }

    /// Sync one source collection into its shard.
    ///
    /// Serialized per (db_key, collection): a second call for the same pair
    /// waits for the first to finish, then sees its state and skips.
    pub async fn sync(
        &self,
        req: &SyncRequest,
        reporter: &dyn SyncProgressReporter,
        cancel: &CancelToken,
    ) -> Result<SyncReport, EngineError> {
        let lock = self.lock_for(&req.db_key, &req.collection);
        let _guard = lock.lock().await;
        self.sync_locked(req, reporter, cancel).await
    }

    /// Streaming variant: spawns the sync and returns an ordered event feed.
    /// Errors surface as a final `error` event; the feed then halts.
    pub fn sync_streaming(
        self: &Arc<Self>,
        req: SyncRequest,
        cancel: CancelToken,
    ) -> UnboundedReceiver<SyncEvent> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let reporter = ChannelProgress::new(tx.clone());
            if let Err(e) = engine.sync(&req, &reporter, &cancel).await {
                let _ = tx.send(SyncEvent::Error {
                    message: e.to_string(),
                });
            }
        });
        rx
    }

    async fn sync_locked(
        &self,
        req: &SyncRequest,
        reporter: &dyn SyncProgressReporter,
        cancel: &CancelToken,
    ) -> Result<SyncReport, EngineError> {
        let params = ChunkingParams::new(req.chunk_size, req.overlap);
        params.validate()?;

        let source = self.source(&req.db_key)?;
        reporter.report(&SyncEvent::Init {
            db_key: req.db_key.clone(),
            collection: req.collection.clone(),
        });

        cancel.check()?;
        let check = self
            .detector
            .needs_sync(source.as_ref(), &req.db_key, &req.collection, req.force)
            .await?;

        if !check.required {
            reporter.report(&SyncEvent::Skipped {
                reason: check.reason,
            });
            return Ok(self.skipped_report(req, check.reason));
        }
        let action = check.action.unwrap_or(SyncAction::Vectorize);

        // The previous state is needed before a clear wipes it: append syncs
        // extend its counts.
        let prior_state = self.states.get(&req.db_key, &req.collection).await?;

        cancel.check()?;
        let shard = self
            .shards
            .ensure_exists(self.index.as_ref(), &req.db_key)
            .await?;

        if action == SyncAction::ClearAndRevectorize {
            reporter.report(&SyncEvent::Clearing);
            let deleted = self
                .clear_collection_points(&shard, &req.db_key, &req.collection)
                .await?;
            self.states.clear(&req.db_key, &req.collection).await?;
            reporter.report(&SyncEvent::Cleared { deleted });
        }

        cancel.check()?;
        let docs = source
            .find(&req.collection, req.max_documents)
            .await
            .map_err(EngineError::Source)?;
        reporter.report(&SyncEvent::Loaded {
            count: docs.len() as u64,
            limited: req.max_documents.is_some(),
        });

        if docs.is_empty() {
            // A forced sync bypasses the count check, so this is the first
            // point where a missing collection shows up.
            let known = source
                .list_collections()
                .await
                .map_err(EngineError::Source)?;
            if !known.contains(&req.collection) {
                return Err(EngineError::CollectionNotFound(
                    req.db_key.clone(),
                    req.collection.clone(),
                ));
            }
            reporter.report(&SyncEvent::Skipped {
                reason: SyncReason::EmptyCollection,
            });
            return Ok(self.skipped_report(req, SyncReason::EmptyCollection));
        }

        // Append: the source only tells us the count grew, not which
        // documents are new. Best effort is to take the fetched tail beyond
        // the previously recorded count, in storage order.
        let (skip, base_vectors) = match (action, &prior_state) {
            (SyncAction::AppendVectors, Some(state)) => (
                (state.document_count.max(0) as usize).min(docs.len()),
                state.vector_count,
            ),
            _ => (0, 0),
        };
        let to_process = &docs[skip..];
        let total = to_process.len() as u64;

        let mut documents_processed = 0u64;
        let mut chunks_written = 0u64;
        let mut batch: Vec<VectorPoint> = Vec::new();

        for (doc_idx, doc) in to_process.iter().enumerate() {
            cancel.check()?;

            let text = build_document_text(doc, &req.text_fields);
            if text.trim().is_empty() {
                continue;
            }

            let chunks = chunk_text(&text, params);

            // Embed on a bounded pool; `buffered` yields in input order, so
            // chunk_index stays aligned with chunk position.
            let vectors: Vec<Vec<f32>> = stream::iter(
                chunks
                    .iter()
                    .cloned()
                    .map(|chunk| async move { self.embedder.embed_document(&chunk).await }),
            )
            .buffered(self.options.embed_concurrency.max(1))
            .try_collect()
            .await?;

            let created_at = Utc::now();
            for (idx, (chunk, vector)) in chunks.iter().zip(vectors).enumerate() {
                batch.push(VectorPoint {
                    id: Uuid::new_v4().to_string(),
                    vector,
                    payload: PointPayload {
                        db_key: req.db_key.clone(),
                        source_collection: req.collection.clone(),
                        source_doc_id: doc.id.clone(),
                        chunk_index: idx as u32,
                        text: chunk.clone(),
                        metadata: PointMetadata {
                            text_fields: req.text_fields.clone(),
                            db_name: source.display_name().to_string(),
                        },
                        created_at,
                    },
                });
                chunks_written += 1;

                if batch.len() >= req.batch_size {
                    cancel.check()?;
                    self.upsert_with_retry(&shard, &batch).await?;
                    reporter.report(&SyncEvent::BatchUploaded {
                        size: batch.len() as u64,
                    });
                    batch.clear();
                }
            }

            documents_processed += 1;
            let current = (doc_idx + 1) as u64;
            if current % 10 == 0 || current == total {
                reporter.report(&SyncEvent::Processing {
                    progress: ((current * 100) / total) as u8,
                    current,
                    total,
                    chunks: chunks_written,
                });
            }
        }

        if !batch.is_empty() {
            cancel.check()?;
            self.upsert_with_retry(&shard, &batch).await?;
            reporter.report(&SyncEvent::FinalBatch {
                size: batch.len() as u64,
            });
        }

        reporter.report(&SyncEvent::SavingState);
        let fingerprint = self
            .detector
            .compute_fingerprint(source.as_ref(), &req.collection)
            .await?;

        let state = VectorizationState {
            db_key: req.db_key.clone(),
            collection_name: req.collection.clone(),
            document_count: (skip + to_process.len()) as i64,
            vector_count: base_vectors + chunks_written as i64,
            text_fields: req.text_fields.clone(),
            chunk_size: req.chunk_size as i64,
            overlap: req.overlap as i64,
            content_fingerprint: fingerprint,
            last_synced: Utc::now(),
            status: "completed".to_string(),
        };
        self.states.set(&state).await?;

        // Refresh the cached shard count; purely informational.
        if let Ok(Some(info)) = self.index.collection_info(&shard).await {
            let _ = self.shards.set_vector_count(&req.db_key, info.point_count);
        }

        let report = SyncReport {
            status: SyncStatus::Success,
            reason: check.reason,
            action: Some(action),
            db_key: req.db_key.clone(),
            collection: req.collection.clone(),
            documents_processed,
            chunks_written,
            timestamp: Utc::now(),
        };
        reporter.report(&SyncEvent::Complete {
            report: report.clone(),
        });
        Ok(report)
    }

    fn skipped_report(&self, req: &SyncRequest, reason: SyncReason) -> SyncReport {
        SyncReport {
            status: SyncStatus::Skipped,
            reason,
            action: None,
            db_key: req.db_key.clone(),
            collection: req.collection.clone(),
            documents_processed: 0,
            chunks_written: 0,
            timestamp: Utc::now(),
        }
    }

    async fn upsert_with_retry(
        &self,
        shard: &str,
        points: &[VectorPoint],
    ) -> Result<(), EngineError> {
        let mut last_err = None;
        for attempt in 0..=self.options.upsert_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                warn!(shard, attempt, "retrying index upsert after failure");
                tokio::time::sleep(delay).await;
            }
            match self.index.upsert(shard, points).await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        Err(EngineError::Index(last_err.unwrap_or_else(|| {
            anyhow::anyhow!("index upsert failed")
        })))
    }

    /// Delete every point for (db_key, collection) from a shard: paginated
    /// scroll of matching ids, then one bulk delete.
    async fn clear_collection_points(
        &self,
        shard: &str,
        db_key: &str,
        collection: &str,
    ) -> Result<u64, EngineError> {
        let info = self
            .index
            .collection_info(shard)
            .await
            .map_err(EngineError::Index)?;
        if info.is_none() {
            debug!(shard, "shard collection absent; nothing to clear");
            return Ok(0);
        }

        let filter = PointFilter::for_collection(db_key, collection);
        let mut ids = Vec::new();
        let mut offset = None;
        loop {
            let page = self
                .index
                .scroll(shard, &filter, offset, SCROLL_PAGE, false)
                .await
                .map_err(EngineError::Index)?;
            ids.extend(page.points.into_iter().map(|p| p.id));
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        if !ids.is_empty() {
            self.index
                .delete_points(shard, &ids)
                .await
                .map_err(EngineError::Index)?;
        }
        Ok(ids.len() as u64)
    }

    /// Fan-out sync across databases and collections, continuing past
    /// per-pair errors. System collections are excluded.
    pub async fn sync_all(
        &self,
        req: &SyncAllRequest,
        cancel: &CancelToken,
    ) -> Result<SyncAllReport, EngineError> {
        let db_keys = match &req.db_keys {
            Some(keys) => keys.clone(),
            None => self.sources.keys(),
        };

        let mut results = Vec::new();

        for db_key in db_keys {
            let Some(source) = self.sources.get(&db_key) else {
                continue;
            };

            let collections = match source.list_collections().await {
                Ok(collections) => collections,
                Err(e) => {
                    results.push(SyncAllEntry {
                        db_key: db_key.clone(),
                        collection: "*".to_string(),
                        status: "error".to_string(),
                        reason: None,
                        documents_processed: 0,
                        chunks_written: 0,
                        error: Some(e.to_string()),
                    });
                    continue;
                }
            };

            for collection in collections {
                if SYSTEM_COLLECTIONS.contains(&collection.as_str()) {
                    continue;
                }
                cancel.check()?;

                let doc_count = match source.count_documents(&collection).await {
                    Ok(count) => count,
                    Err(e) => {
                        results.push(SyncAllEntry {
                            db_key: db_key.clone(),
                            collection,
                            status: "error".to_string(),
                            reason: None,
                            documents_processed: 0,
                            chunks_written: 0,
                            error: Some(e.to_string()),
                        });
                        continue;
                    }
                };
                if doc_count == 0 {
                    continue;
                }

                let text_fields = if req.auto_detect_fields {
                    let sample = source
                        .find(&collection, Some(1))
                        .await
                        .unwrap_or_default();
                    sample
                        .first()
                        .map(auto_detect_text_fields)
                        .unwrap_or_default()
                } else {
                    DEFAULT_TEXT_FIELDS.iter().map(|s| s.to_string()).collect()
                };

                if text_fields.is_empty() {
                    results.push(SyncAllEntry {
                        db_key: db_key.clone(),
                        collection,
                        status: "skipped".to_string(),
                        reason: Some(SyncReason::NoTextFields),
                        documents_processed: 0,
                        chunks_written: 0,
                        error: None,
                    });
                    continue;
                }

                let sync_req = SyncRequest {
                    db_key: db_key.clone(),
                    collection: collection.clone(),
                    text_fields,
                    chunk_size: self.options.chunking.chunk_size,
                    overlap: self.options.chunking.overlap,
                    batch_size: self.options.batch_size,
                    max_documents: req.max_documents_per_collection,
                    force: req.force,
                };

                match self.sync(&sync_req, &NoProgress, cancel).await {
                    Ok(report) => results.push(SyncAllEntry {
                        db_key: db_key.clone(),
                        collection,
                        status: match report.status {
                            SyncStatus::Success => "success".to_string(),
                            SyncStatus::Skipped => "skipped".to_string(),
                        },
                        reason: Some(report.reason),
                        documents_processed: report.documents_processed,
                        chunks_written: report.chunks_written,
                        error: None,
                    }),
                    Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                    Err(e) => results.push(SyncAllEntry {
                        db_key: db_key.clone(),
                        collection,
                        status: "error".to_string(),
                        reason: None,
                        documents_processed: 0,
                        chunks_written: 0,
                        error: Some(e.to_string()),
                    }),
                }
            }
        }

        let successful = results.iter().filter(|r| r.status == "success").count();
        let skipped = results.iter().filter(|r| r.status == "skipped").count();
        let errors = results.iter().filter(|r| r.status == "error").count();

        Ok(SyncAllReport {
            total_collections: results.len(),
            successful,
            skipped,
            errors,
            results,
            timestamp: Utc::now(),
        })
    }

    /// Status sweep: for each non-empty, non-system collection, whether a
    /// sync is needed and what the state record says.
    pub async fn check_status(
        &self,
        db_key: Option<&str>,
        collection: Option<&str>,
    ) -> Result<Vec<CollectionStatus>, EngineError> {
        let db_keys = match db_key {
            Some(key) => vec![key.to_string()],
            None => self.sources.keys(),
        };

        let mut results = Vec::new();

        for key in db_keys {
            let Some(source) = self.sources.get(&key) else {
                continue;
            };

            let collections = match collection {
                Some(name) => vec![name.to_string()],
                None => source
                    .list_collections()
                    .await
                    .map_err(EngineError::Source)?
                    .into_iter()
                    .filter(|c| !SYSTEM_COLLECTIONS.contains(&c.as_str()))
                    .collect(),
            };

            for coll in collections {
                let doc_count = source
                    .count_documents(&coll)
                    .await
                    .map_err(EngineError::Source)? as i64;
                if doc_count == 0 {
                    continue;
                }

                let check = self
                    .detector
                    .needs_sync(source.as_ref(), &key, &coll, false)
                    .await?;
                let state = self.states.get(&key, &coll).await?;

                results.push(CollectionStatus {
                    db_key: key.clone(),
                    db_name: source.display_name().to_string(),
                    collection: coll,
                    document_count: doc_count,
                    needs_sync: check.required,
                    reason: check.reason,
                    action: check.action,
                    vector_count: state.as_ref().map(|s| s.vector_count).unwrap_or(0),
                    last_synced: state.map(|s| s.last_synced),
                });
            }
        }

        Ok(results)
    }

    /// Clear vectors and their state records.
    ///
    /// - `(db_key, collection)` — filtered point delete plus that pair's
    ///   state record.
    /// - `(db_key, None)` — drop and recreate the database's whole shard
    ///   collection, clearing every state record for that database.
    /// - `(None, _)` — the above for every registered database.
    pub async fn clear_vectors(
        &self,
        db_key: Option<&str>,
        collection: Option<&str>,
    ) -> Result<ClearReport, EngineError> {
        match (db_key, collection) {
            (Some(db), Some(coll)) => {
                self.source(db)?;
                let shard = self.shards.resolve(db)?;
                let deleted = self.clear_collection_points(&shard, db, coll).await?;
                let cleared = self.states.clear(db, coll).await?;
                Ok(ClearReport {
                    status: "cleared".to_string(),
                    points_deleted: deleted,
                    states_cleared: cleared as u64,
                })
            }
            (Some(db), None) => self.reset_database(db).await,
            (None, _) => {
                let mut points_deleted = 0;
                let mut states_cleared = 0;
                for db in self.sources.keys() {
                    let report = self.reset_database(&db).await?;
                    points_deleted += report.points_deleted;
                    states_cleared += report.states_cleared;
                }
                Ok(ClearReport {
                    status: "collection_reset".to_string(),
                    points_deleted,
                    states_cleared,
                })
            }
        }
    }

    /// Drop and recreate one database's shard collection, empty.
    async fn reset_database(&self, db_key: &str) -> Result<ClearReport, EngineError> {
        self.source(db_key)?;
        let shard = self.shards.resolve(db_key)?;

        let deleted = match self
            .index
            .collection_info(&shard)
            .await
            .map_err(EngineError::Index)?
        {
            Some(info) => {
                self.index
                    .delete_collection(&shard)
                    .await
                    .map_err(EngineError::Index)?;
                self.index
                    .create_collection(&shard, self.shards.dimension())
                    .await
                    .map_err(EngineError::Index)?;
                info.point_count
            }
            None => 0,
        };

        let cleared = self.states.clear_database(db_key).await?;
        self.shards.set_vector_count(db_key, 0)?;

        Ok(ClearReport {
            status: "cleared".to_string(),
            points_deleted: deleted,
            states_cleared: cleared,
        })
    }

    /// Cross-shard statistics: live totals per shard plus a payload-scroll
    /// breakdown by (db_key, collection).
    pub async fn vector_stats(&self) -> Result<VectorStats, EngineError> {
        let mut total_vectors = 0;
        let mut shards = Vec::new();
        let mut breakdown: HashMap<(String, String), u64> = HashMap::new();

        for db_key in self.sources.keys() {
            let source = self.source(&db_key)?;
            let shard = self.shards.resolve(&db_key)?;

            let Some(info) = self
                .index
                .collection_info(&shard)
                .await
                .map_err(EngineError::Index)?
            else {
                continue;
            };
            total_vectors += info.point_count;
            shards.push(ShardSummary {
                db_key: db_key.clone(),
                db_name: source.display_name().to_string(),
                collection_name: shard.clone(),
                total_vectors: info.point_count,
            });

            let mut offset = None;
            loop {
                let page = self
                    .index
                    .scroll(&shard, &PointFilter::default(), offset, SCROLL_PAGE, true)
                    .await
                    .map_err(EngineError::Index)?;
                for point in &page.points {
                    if let Some(payload) = &point.payload {
                        *breakdown
                            .entry((payload.db_key.clone(), payload.source_collection.clone()))
                            .or_insert(0) += 1;
                    }
                }
                match page.next_offset {
                    Some(next) => offset = Some(next),
                    None => break,
                }
            }
        }

        let mut breakdown: Vec<BreakdownEntry> = breakdown
            .into_iter()
            .map(|((db_key, collection), vector_count)| BreakdownEntry {
                db_key,
                collection,
                vector_count,
            })
            .collect();
        breakdown.sort_by(|a, b| (&a.db_key, &a.collection).cmp(&(&b.db_key, &b.collection)));

        Ok(VectorStats {
            total_vectors,
            vector_dimension: self.shards.dimension(),
            distance_metric: "cosine".to_string(),
            shards,
            breakdown,
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.embedder.cache_stats()
    }

    /// Drop every cached embedding. Returns how many entries were held.
    pub fn clear_cache(&self) -> usize {
        self.embedder.clear_cache()
    }

    pub fn usage(&self) -> UsageStats {
        self.counters.snapshot()
    }

    pub fn reset_usage(&self) {
        self.counters.reset();
    }

    pub fn state_store(&self) -> &StateStore {
        &self.states
    }
}
