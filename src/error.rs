//! Engine error taxonomy.
//!
//! Backend implementations (document sources, vector indexes, embedding
//! providers) report failures as `anyhow::Error`; the engine wraps them into
//! [`EngineError`] at its boundary so callers can distinguish missing
//! resources from transport failures. An empty source collection is an
//! outcome, not an error — it never surfaces here.

use thiserror::Error;

/// Errors surfaced by the sync engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested source database key is not registered.
    #[error("database '{0}' not found")]
    DatabaseNotFound(String),

    /// The requested collection does not exist in the source database.
    #[error("collection '{1}' not found in database '{0}'")]
    CollectionNotFound(String, String),

    /// Chunking configuration rejected at the boundary.
    #[error("invalid chunking configuration: {0}")]
    InvalidChunking(String),

    /// A vector index operation (create/upsert/scroll/delete) failed.
    #[error("vector index error: {0}")]
    Index(anyhow::Error),

    /// A document source operation failed.
    #[error("document source error: {0}")]
    Source(anyhow::Error),

    /// Embedding generation failed after retries.
    #[error("embedding error: {0}")]
    Embedding(anyhow::Error),

    /// The vectorization state store failed.
    #[error("state store error: {0}")]
    State(#[from] sqlx::Error),

    /// The shard mapping file could not be read or written.
    #[error("shard mapping error: {0}")]
    ShardMapping(anyhow::Error),

    /// The sync was cancelled via its [`CancelToken`](crate::sync::CancelToken).
    #[error("sync cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_keys() {
        let err = EngineError::DatabaseNotFound("primary".to_string());
        assert_eq!(err.to_string(), "database 'primary' not found");

        let err = EngineError::CollectionNotFound("primary".to_string(), "notes".to_string());
        assert_eq!(
            err.to_string(),
            "collection 'notes' not found in database 'primary'"
        );
    }

    #[test]
    fn wrapped_backend_errors_keep_their_message() {
        let err = EngineError::Index(anyhow::anyhow!("connection refused"));
        assert_eq!(err.to_string(), "vector index error: connection refused");
    }
}
