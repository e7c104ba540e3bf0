use anyhow::Result;
use sqlx::SqlitePool;

/// Create the sync state schema if it does not exist yet.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per synced document, per collection
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_records (
            collection TEXT NOT NULL,
            document_id TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            title TEXT NOT NULL,
            last_modified INTEGER NOT NULL,
            version INTEGER NOT NULL,
            synced_at INTEGER NOT NULL,
            PRIMARY KEY (collection, document_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sync_records_synced_at ON sync_records(collection, synced_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
