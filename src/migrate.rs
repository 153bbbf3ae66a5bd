use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the database file and apply the schema. Idempotent.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Monitored targets
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS targets (
            id TEXT PRIMARY KEY,
            owner_kind TEXT NOT NULL,
            owner_ref TEXT NOT NULL,
            name TEXT,
            url TEXT NOT NULL,
            selector TEXT,
            xpath TEXT,
            interval_secs INTEGER NOT NULL,
            max_pages INTEGER NOT NULL DEFAULT 1,
            is_active INTEGER NOT NULL DEFAULT 1,
            last_fingerprint TEXT,
            last_snapshot TEXT,
            last_checked_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Databases created before targets carried a snapshot
    let has_snapshot: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('targets') WHERE name = 'last_snapshot'",
    )
    .fetch_one(pool)
    .await?;
    if has_snapshot == 0 {
        sqlx::query("ALTER TABLE targets ADD COLUMN last_snapshot TEXT")
            .execute(pool)
            .await?;
    }

    // Append-only change history
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS change_records (
            id TEXT PRIMARY KEY,
            target_id TEXT NOT NULL,
            old_preview TEXT NOT NULL,
            new_preview TEXT NOT NULL,
            summary TEXT NOT NULL,
            detected_at INTEGER NOT NULL,
            FOREIGN KEY (target_id) REFERENCES targets(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_change_records_target ON change_records(target_id, detected_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            target_id TEXT NOT NULL,
            email TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            UNIQUE(target_id, email),
            FOREIGN KEY (target_id) REFERENCES targets(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Retrieval chunks, grouped by scrape session. No foreign key to
    // targets: the index is purged explicitly on delete.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            target_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            session_seq INTEGER NOT NULL,
            sequence_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            source_url TEXT NOT NULL,
            selector_used TEXT,
            hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(session_id, sequence_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_target ON chunks(target_id, session_seq)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            target_id TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunk_vectors_target ON chunk_vectors(target_id)")
        .execute(pool)
        .await?;

    Ok(())
}
