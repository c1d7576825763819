//! Core data model shared across the sync engine.
//!
//! These types represent the vectorization state records, index points, and
//! sync outcomes that flow through change detection, embedding, and index
//! writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-(db_key, collection) vectorization state.
///
/// Exists if and only if the collection has been synced at least once.
/// Upserted on every successful sync, deleted when the collection's vectors
/// are cleared. Owned exclusively by the state store / change detector.
#[derive(Debug, Clone, Serialize)]
pub struct VectorizationState {
    pub db_key: String,
    pub collection_name: String,
    /// Document count observed at the end of the last sync.
    pub document_count: i64,
    /// Total chunks written for this collection across all syncs.
    pub vector_count: i64,
    /// Ordered field names used to build each document's text blob.
    pub text_fields: Vec<String>,
    pub chunk_size: i64,
    pub overlap: i64,
    /// Sampled content fingerprint (see [`crate::state::ChangeDetector`]).
    pub content_fingerprint: String,
    pub last_synced: DateTime<Utc>,
    pub status: String,
}

/// Field-provenance metadata carried on every point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointMetadata {
    /// The text fields that were concatenated into the embedded blob.
    pub text_fields: Vec<String>,
    /// Human-readable name of the source database.
    pub db_name: String,
}

/// Payload stored alongside each vector in the index.
///
/// `db_key` and `source_collection` are the filter keys for clearing and
/// enumeration; `source_doc_id` + `chunk_index` locate the chunk within its
/// document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointPayload {
    pub db_key: String,
    pub source_collection: String,
    pub source_doc_id: String,
    /// 0-based position of this chunk within its document.
    pub chunk_index: u32,
    /// The chunk text itself.
    pub text: String,
    pub metadata: PointMetadata,
    pub created_at: DateTime<Utc>,
}

/// One embedding plus its provenance payload — the atomic unit written to
/// and deleted from the vector index. Point ids are fresh UUIDs, never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// Persisted mapping from a source database key to its dedicated index
/// collection. Dimension is fixed at creation; a mismatch forces shard
/// recreation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardMapping {
    pub collection_name: String,
    pub dimension: usize,
    pub created_at: DateTime<Utc>,
    /// Cached point count, refreshed after syncs. Informational only.
    #[serde(default)]
    pub vector_count: u64,
}

/// What a sync pass must do, as decided by the change detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// First sync for this collection.
    Vectorize,
    /// Clear existing points, then rebuild from scratch.
    ClearAndRevectorize,
    /// Embed and upsert only the documents beyond the recorded count.
    AppendVectors,
}

/// Why a sync is (or is not) required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncReason {
    Forced,
    EmptyCollection,
    NeverVectorized,
    ContentChanged,
    NewDocuments,
    UpToDate,
    NoTextFields,
}

impl SyncReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncReason::Forced => "forced",
            SyncReason::EmptyCollection => "empty_collection",
            SyncReason::NeverVectorized => "never_vectorized",
            SyncReason::ContentChanged => "content_changed",
            SyncReason::NewDocuments => "new_documents",
            SyncReason::UpToDate => "up_to_date",
            SyncReason::NoTextFields => "no_text_fields",
        }
    }
}

/// Decision returned by [`needs_sync`](crate::state::ChangeDetector::needs_sync).
#[derive(Debug, Clone, Serialize)]
pub struct SyncCheck {
    pub required: bool,
    pub reason: SyncReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<SyncAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_count: Option<i64>,
}

/// Terminal status of a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Skipped,
}

/// Aggregate result of a single-collection sync.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub reason: SyncReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<SyncAction>,
    pub db_key: String,
    pub collection: String,
    /// Documents that produced at least one chunk this pass.
    pub documents_processed: u64,
    /// Chunks embedded and written this pass.
    pub chunks_written: u64,
    pub timestamp: DateTime<Utc>,
}

/// One row of a status sweep across collections.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStatus {
    pub db_key: String,
    pub db_name: String,
    pub collection: String,
    pub document_count: i64,
    pub needs_sync: bool,
    pub reason: SyncReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<SyncAction>,
    pub vector_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<DateTime<Utc>>,
}

/// Per-collection entry of a fan-out sync.
#[derive(Debug, Clone, Serialize)]
pub struct SyncAllEntry {
    pub db_key: String,
    pub collection: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SyncReason>,
    pub documents_processed: u64,
    pub chunks_written: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of a fan-out sync across databases and collections.
#[derive(Debug, Clone, Serialize)]
pub struct SyncAllReport {
    pub results: Vec<SyncAllEntry>,
    pub total_collections: usize,
    pub successful: usize,
    pub skipped: usize,
    pub errors: usize,
    pub timestamp: DateTime<Utc>,
}

/// Result of a clear-vectors call.
#[derive(Debug, Clone, Serialize)]
pub struct ClearReport {
    pub status: String,
    pub points_deleted: u64,
    pub states_cleared: u64,
}
