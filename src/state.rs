//! Vectorization state store and change detection.
//!
//! [`StateStore`] owns the `vector_state` table: one row per
//! (db_key, collection), created on first successful sync, upserted on every
//! later one, and deleted when the collection's vectors are cleared.
//!
//! [`ChangeDetector`] decides whether a sync is required by comparing the
//! live collection against the stored record. Drift is detected through a
//! *content fingerprint*: a hash over the ids and modification markers of up
//! to the first [`FINGERPRINT_SAMPLE`] documents in storage order. Edits
//! confined to documents beyond that window go undetected; only the count
//! comparison sees growth past it. Known limitation.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::error::EngineError;
use crate::models::{SyncAction, SyncCheck, SyncReason, VectorizationState};
use crate::source::DocumentSource;

/// How many documents the content fingerprint samples.
pub const FINGERPRINT_SAMPLE: usize = 100;

/// SQLite-backed store for [`VectorizationState`] records.
#[derive(Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(
        &self,
        db_key: &str,
        collection: &str,
    ) -> Result<Option<VectorizationState>, EngineError> {
        let row = sqlx::query(
            "SELECT * FROM vector_state WHERE db_key = ? AND collection_name = ?",
        )
        .bind(db_key)
        .bind(collection)
        .fetch_optional(&self.pool)
        .await?;

        row.map(state_from_row).transpose()
    }

    /// Insert or update the record for (db_key, collection).
    pub async fn set(&self, state: &VectorizationState) -> Result<(), EngineError> {
        let text_fields = serde_json::to_string(&state.text_fields)
            .unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            r#"
            INSERT INTO vector_state (
                db_key, collection_name, document_count, vector_count,
                text_fields, chunk_size, overlap, content_fingerprint,
                last_synced, status
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(db_key, collection_name) DO UPDATE SET
                document_count = excluded.document_count,
                vector_count = excluded.vector_count,
                text_fields = excluded.text_fields,
                chunk_size = excluded.chunk_size,
                overlap = excluded.overlap,
                content_fingerprint = excluded.content_fingerprint,
                last_synced = excluded.last_synced,
                status = excluded.status
            "#,
        )
        .bind(&state.db_key)
        .bind(&state.collection_name)
        .bind(state.document_count)
        .bind(state.vector_count)
        .bind(text_fields)
        .bind(state.chunk_size)
        .bind(state.overlap)
        .bind(&state.content_fingerprint)
        .bind(state.last_synced.timestamp())
        .bind(&state.status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete the record for one collection. Returns whether a row existed.
    pub async fn clear(&self, db_key: &str, collection: &str) -> Result<bool, EngineError> {
        let result =
            sqlx::query("DELETE FROM vector_state WHERE db_key = ? AND collection_name = ?")
                .bind(db_key)
                .bind(collection)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every record for a database. Returns how many were removed.
    pub async fn clear_database(&self, db_key: &str) -> Result<u64, EngineError> {
        let result = sqlx::query("DELETE FROM vector_state WHERE db_key = ?")
            .bind(db_key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// All records, optionally restricted to one database.
    pub async fn list(&self, db_key: Option<&str>) -> Result<Vec<VectorizationState>, EngineError> {
        let rows = match db_key {
            Some(key) => {
                sqlx::query("SELECT * FROM vector_state WHERE db_key = ? ORDER BY collection_name")
                    .bind(key)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM vector_state ORDER BY db_key, collection_name")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(state_from_row).collect()
    }
}

fn state_from_row(row: sqlx::sqlite::SqliteRow) -> Result<VectorizationState, EngineError> {
    let text_fields_json: String = row.get("text_fields");
    let text_fields: Vec<String> = serde_json::from_str(&text_fields_json).unwrap_or_default();
    let last_synced_ts: i64 = row.get("last_synced");
    let last_synced = DateTime::<Utc>::from_timestamp(last_synced_ts, 0).unwrap_or_else(Utc::now);

    Ok(VectorizationState {
        db_key: row.get("db_key"),
        collection_name: row.get("collection_name"),
        document_count: row.get("document_count"),
        vector_count: row.get("vector_count"),
        text_fields,
        chunk_size: row.get("chunk_size"),
        overlap: row.get("overlap"),
        content_fingerprint: row.get("content_fingerprint"),
        last_synced,
        status: row.get("status"),
    })
}

/// Decides whether a (db_key, collection) pair needs a sync, and of what kind.
#[derive(Clone)]
pub struct ChangeDetector {
    store: StateStore,
}

impl ChangeDetector {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Hash the ids and modification markers of up to the first
    /// [`FINGERPRINT_SAMPLE`] documents, in storage order.
    pub async fn compute_fingerprint(
        &self,
        source: &dyn DocumentSource,
        collection: &str,
    ) -> Result<String, EngineError> {
        let docs = source
            .find(collection, Some(FINGERPRINT_SAMPLE))
            .await
            .map_err(EngineError::Source)?;

        let mut hasher = Sha256::new();
        for doc in &docs {
            hasher.update(doc.id.as_bytes());
            hasher.update(doc.modified_marker().as_bytes());
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// The decision ladder:
    /// 1. forced → full resync, regardless of state
    /// 2. zero documents → nothing to do
    /// 3. no state record → initial vectorize
    /// 4. fingerprint drift → full resync
    /// 5. document count grew → append
    /// 6. otherwise → up to date
    pub async fn needs_sync(
        &self,
        source: &dyn DocumentSource,
        db_key: &str,
        collection: &str,
        force: bool,
    ) -> Result<SyncCheck, EngineError> {
        if force {
            return Ok(SyncCheck {
                required: true,
                reason: SyncReason::Forced,
                action: Some(SyncAction::ClearAndRevectorize),
                previous_count: None,
                current_count: None,
            });
        }

        let current_count = source
            .count_documents(collection)
            .await
            .map_err(EngineError::Source)? as i64;

        if current_count == 0 {
            return Ok(SyncCheck {
                required: false,
                reason: SyncReason::EmptyCollection,
                action: None,
                previous_count: None,
                current_count: Some(0),
            });
        }

        let state = self.store.get(db_key, collection).await?;
        let Some(state) = state else {
            return Ok(SyncCheck {
                required: true,
                reason: SyncReason::NeverVectorized,
                action: Some(SyncAction::Vectorize),
                previous_count: None,
                current_count: Some(current_count),
            });
        };

        let current_fingerprint = self.compute_fingerprint(source, collection).await?;
        if state.content_fingerprint != current_fingerprint {
            return Ok(SyncCheck {
                required: true,
                reason: SyncReason::ContentChanged,
                action: Some(SyncAction::ClearAndRevectorize),
                previous_count: Some(state.document_count),
                current_count: Some(current_count),
            });
        }

        if current_count > state.document_count {
            return Ok(SyncCheck {
                required: true,
                reason: SyncReason::NewDocuments,
                action: Some(SyncAction::AppendVectors),
                previous_count: Some(state.document_count),
                current_count: Some(current_count),
            });
        }

        Ok(SyncCheck {
            required: false,
            reason: SyncReason::UpToDate,
            action: None,
            previous_count: Some(state.document_count),
            current_count: Some(current_count),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate;
    use crate::source::{MemorySource, SourceDocument};
    use serde_json::json;

    async fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect(&dir.path().join("state.db")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (dir, StateStore::new(pool))
    }

    fn sample_state(db_key: &str, collection: &str) -> VectorizationState {
        VectorizationState {
            db_key: db_key.to_string(),
            collection_name: collection.to_string(),
            document_count: 3,
            vector_count: 3,
            text_fields: vec!["title".to_string(), "body".to_string()],
            chunk_size: 500,
            overlap: 50,
            content_fingerprint: "abc".to_string(),
            last_synced: Utc::now(),
            status: "completed".to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_by_key_pair() {
        let (_dir, store) = store().await;
        let mut state = sample_state("primary", "notes");
        store.set(&state).await.unwrap();

        state.document_count = 5;
        state.vector_count = 9;
        store.set(&state).await.unwrap();

        let loaded = store.get("primary", "notes").await.unwrap().unwrap();
        assert_eq!(loaded.document_count, 5);
        assert_eq!(loaded.vector_count, 9);
        assert_eq!(loaded.text_fields, vec!["title", "body"]);

        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clear_removes_record() {
        let (_dir, store) = store().await;
        store.set(&sample_state("primary", "notes")).await.unwrap();
        assert!(store.clear("primary", "notes").await.unwrap());
        assert!(store.get("primary", "notes").await.unwrap().is_none());
        assert!(!store.clear("primary", "notes").await.unwrap());
    }

    #[tokio::test]
    async fn decision_ladder() {
        let (_dir, store) = store().await;
        let detector = ChangeDetector::new(store.clone());
        let source = MemorySource::new("Test");

        // Forced wins over everything.
        let check = detector
            .needs_sync(&source, "primary", "notes", true)
            .await
            .unwrap();
        assert_eq!(check.reason, SyncReason::Forced);
        assert_eq!(check.action, Some(SyncAction::ClearAndRevectorize));

        // Empty collection → no work.
        let check = detector
            .needs_sync(&source, "primary", "notes", false)
            .await
            .unwrap();
        assert!(!check.required);
        assert_eq!(check.reason, SyncReason::EmptyCollection);

        // Documents but no state → initial vectorize.
        source.insert(
            "notes",
            SourceDocument::from_value("d1", json!({"title": "a", "updated_at": "t1"})),
        );
        let check = detector
            .needs_sync(&source, "primary", "notes", false)
            .await
            .unwrap();
        assert!(check.required);
        assert_eq!(check.reason, SyncReason::NeverVectorized);
        assert_eq!(check.action, Some(SyncAction::Vectorize));

        // Matching state + fingerprint → up to date.
        let fingerprint = detector.compute_fingerprint(&source, "notes").await.unwrap();
        let mut state = sample_state("primary", "notes");
        state.document_count = 1;
        state.content_fingerprint = fingerprint;
        store.set(&state).await.unwrap();
        let check = detector
            .needs_sync(&source, "primary", "notes", false)
            .await
            .unwrap();
        assert!(!check.required);
        assert_eq!(check.reason, SyncReason::UpToDate);

        // Changing a sampled document's marker → content changed.
        source.update(
            "notes",
            SourceDocument::from_value("d1", json!({"title": "a", "updated_at": "t2"})),
        );
        let check = detector
            .needs_sync(&source, "primary", "notes", false)
            .await
            .unwrap();
        assert!(check.required);
        assert_eq!(check.reason, SyncReason::ContentChanged);
        assert_eq!(check.action, Some(SyncAction::ClearAndRevectorize));
    }

    #[tokio::test]
    async fn count_growth_beyond_sample_window_is_append() {
        let (_dir, store) = store().await;
        let detector = ChangeDetector::new(store.clone());
        let source = MemorySource::new("Test");

        for i in 0..FINGERPRINT_SAMPLE + 10 {
            source.insert(
                "big",
                SourceDocument::from_value(
                    &format!("d{:04}", i),
                    json!({"text": "x", "updated_at": "t"}),
                ),
            );
        }

        let fingerprint = detector.compute_fingerprint(&source, "big").await.unwrap();
        let mut state = sample_state("primary", "big");
        state.collection_name = "big".to_string();
        state.document_count = (FINGERPRINT_SAMPLE + 10) as i64;
        state.content_fingerprint = fingerprint;
        store.set(&state).await.unwrap();

        // New documents land beyond the sampled window: the fingerprint is
        // blind to them, but the count comparison is not.
        for i in 0..5 {
            source.insert(
                "big",
                SourceDocument::from_value(
                    &format!("new{}", i),
                    json!({"text": "y", "updated_at": "t"}),
                ),
            );
        }

        let check = detector
            .needs_sync(&source, "primary", "big", false)
            .await
            .unwrap();
        assert!(check.required);
        assert_eq!(check.reason, SyncReason::NewDocuments);
        assert_eq!(check.action, Some(SyncAction::AppendVectors));
        assert_eq!(check.previous_count, Some((FINGERPRINT_SAMPLE + 10) as i64));
        assert_eq!(check.current_count, Some((FINGERPRINT_SAMPLE + 15) as i64));
    }
}
