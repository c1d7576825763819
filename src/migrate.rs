use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Vectorization state: one row per (db_key, collection), upserted on
    // every successful sync.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vector_state (
            db_key TEXT NOT NULL,
            collection_name TEXT NOT NULL,
            document_count INTEGER NOT NULL,
            vector_count INTEGER NOT NULL,
            text_fields TEXT NOT NULL DEFAULT '[]',
            chunk_size INTEGER NOT NULL,
            overlap INTEGER NOT NULL,
            content_fingerprint TEXT NOT NULL,
            last_synced INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'completed',
            PRIMARY KEY (db_key, collection_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vector_state_db_key ON vector_state(db_key)")
        .execute(pool)
        .await?;

    Ok(())
}
