//! SQLite-backed [`ChunkStore`] and [`RecordStore`].
//!
//! Timestamps are stored as Unix milliseconds. Each index session gets a
//! per-target `session_seq` so "newest session" never depends on clock
//! resolution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};

use sitewatch_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use sitewatch_core::models::{
    ChangeRecord, Chunk, IndexStats, MonitoredTarget, Owner, ScoredChunk, Subscription,
    TargetUpdate,
};
use sitewatch_core::store::{rank, ChunkStore, RecordStore};
use sitewatch_core::{Result, WatchError};

/// SQLite implementation of both storage traits.
///
/// Wraps a [`SqlitePool`]; the schema is created by
/// [`migrate::apply_schema`](crate::migrate::apply_schema).
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn db_err(err: sqlx::Error) -> WatchError {
    WatchError::storage(err)
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn target_from_row(row: &SqliteRow) -> Result<MonitoredTarget> {
    let kind: String = row.get("owner_kind");
    let reference: String = row.get("owner_ref");
    let owner = Owner::from_parts(&kind, &reference)
        .ok_or_else(|| WatchError::storage(format!("unknown owner kind '{}'", kind)))?;
    let interval: i64 = row.get("interval_secs");
    let max_pages: i64 = row.get("max_pages");
    let last_checked: Option<i64> = row.get("last_checked_at");
    Ok(MonitoredTarget {
        id: row.get("id"),
        owner,
        name: row.get("name"),
        url: row.get("url"),
        selector: row.get("selector"),
        xpath: row.get("xpath"),
        interval_secs: interval.max(0) as u64,
        max_pages: max_pages.max(1) as u32,
        is_active: row.get::<i64, _>("is_active") != 0,
        last_fingerprint: row.get("last_fingerprint"),
        last_snapshot: row.get("last_snapshot"),
        last_checked_at: last_checked.map(from_millis),
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
    })
}

fn chunk_from_row(row: &SqliteRow) -> Chunk {
    Chunk {
        id: row.get("id"),
        target_id: row.get("target_id"),
        session_id: row.get("session_id"),
        sequence_index: row.get("sequence_index"),
        text: row.get("text"),
        source_url: row.get("source_url"),
        selector_used: row.get("selector_used"),
        hash: row.get("hash"),
        created_at: from_millis(row.get("created_at")),
    }
}

fn subscription_from_row(row: &SqliteRow) -> Subscription {
    Subscription {
        id: row.get("id"),
        target_id: row.get("target_id"),
        email: row.get("email"),
        is_active: row.get::<i64, _>("is_active") != 0,
        created_at: from_millis(row.get("created_at")),
    }
}

const CHUNK_COLUMNS: &str =
    "c.id, c.target_id, c.session_id, c.sequence_index, c.text, c.source_url, c.selector_used, c.hash, c.created_at";

async fn write_session(
    conn: &mut SqliteConnection,
    first: &Chunk,
    chunks: &[Chunk],
    vectors: &[Vec<f32>],
    model: &str,
) -> Result<()> {
    let session_seq: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(session_seq), 0) + 1 FROM chunks WHERE target_id = ?",
    )
    .bind(&first.target_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(db_err)?;

    for (chunk, vector) in chunks.iter().zip(vectors) {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, target_id, session_id, session_seq, sequence_index,
                                text, source_url, selector_used, hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.target_id)
        .bind(&chunk.session_id)
        .bind(session_seq)
        .bind(chunk.sequence_index)
        .bind(&chunk.text)
        .bind(&chunk.source_url)
        .bind(&chunk.selector_used)
        .bind(&chunk.hash)
        .bind(to_millis(chunk.created_at))
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "INSERT INTO chunk_vectors (chunk_id, target_id, model, dims, embedding) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.target_id)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

// ============ Chunks ============

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn insert_session(
        &self,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<()> {
        if chunks.len() != vectors.len() {
            return Err(WatchError::index(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        let Some(first) = chunks.first() else {
            return Ok(());
        };

        // session_seq is read under the write lock so concurrent sessions
        // of one target serialize instead of failing on a stale snapshot.
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(db_err)?;
        let written = match write_session(&mut conn, first, chunks, vectors, model).await {
            Ok(()) => sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map(|_| ())
                .map_err(db_err),
            Err(e) => Err(e),
        };
        if written.is_err() {
            if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                tracing::warn!(error = %e, "rollback of session insert failed");
            }
        }
        written
    }

    async fn count(&self, target_id: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE target_id = ?")
            .bind(target_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(n as usize)
    }

    async fn nearest(
        &self,
        target_id: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let sql = format!(
            "SELECT {}, v.embedding FROM chunks c JOIN chunk_vectors v ON v.chunk_id = c.id WHERE c.target_id = ?",
            CHUNK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(target_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let scored = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                ScoredChunk {
                    chunk: chunk_from_row(row),
                    similarity: cosine_similarity(query, &blob_to_vec(&blob)),
                }
            })
            .collect();
        Ok(rank(scored, limit))
    }

    async fn stats(&self, target_id: &str) -> Result<IndexStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COUNT(DISTINCT session_id) AS sessions FROM chunks WHERE target_id = ?",
        )
        .bind(target_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        let total: i64 = row.get("total");
        let sessions: i64 = row.get("sessions");

        let urls: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT source_url FROM chunks WHERE target_id = ? ORDER BY source_url",
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(IndexStats {
            target_id: target_id.to_string(),
            total_chunks: total as usize,
            sessions: sessions as usize,
            unique_urls: urls.len(),
            urls,
        })
    }

    async fn retain_sessions(&self, target_id: &str, keep: usize) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let cutoff: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT session_seq FROM (
                SELECT DISTINCT session_seq FROM chunks WHERE target_id = ?
                ORDER BY session_seq DESC LIMIT 1 OFFSET ?
            )
            "#,
        )
        .bind(target_id)
        .bind(keep.saturating_sub(1) as i64)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(cutoff) = cutoff else {
            return Ok(0);
        };

        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE target_id = ? AND session_seq < ?)",
        )
        .bind(target_id)
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let removed = sqlx::query("DELETE FROM chunks WHERE target_id = ? AND session_seq < ?")
            .bind(target_id)
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();

        tx.commit().await.map_err(db_err)?;
        Ok(removed as usize)
    }

    async fn purge(&self, target_id: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM chunk_vectors WHERE target_id = ?")
            .bind(target_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let removed = sqlx::query("DELETE FROM chunks WHERE target_id = ?")
            .bind(target_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();

        tx.commit().await.map_err(db_err)?;
        Ok(removed as usize)
    }
}

// ============ Targets, changes, subscriptions ============

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert_target(&self, target: &MonitoredTarget) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO targets (id, owner_kind, owner_ref, name, url, selector, xpath,
                                 interval_secs, max_pages, is_active, last_fingerprint,
                                 last_snapshot, last_checked_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&target.id)
        .bind(target.owner.kind())
        .bind(target.owner.reference())
        .bind(&target.name)
        .bind(&target.url)
        .bind(&target.selector)
        .bind(&target.xpath)
        .bind(target.interval_secs as i64)
        .bind(target.max_pages as i64)
        .bind(target.is_active as i64)
        .bind(&target.last_fingerprint)
        .bind(&target.last_snapshot)
        .bind(target.last_checked_at.map(to_millis))
        .bind(to_millis(target.created_at))
        .bind(to_millis(target.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_target(&self, id: &str) -> Result<Option<MonitoredTarget>> {
        let row = sqlx::query("SELECT * FROM targets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(target_from_row).transpose()
    }

    async fn list_targets(&self, active_only: bool) -> Result<Vec<MonitoredTarget>> {
        let sql = if active_only {
            "SELECT * FROM targets WHERE is_active = 1 ORDER BY created_at, id"
        } else {
            "SELECT * FROM targets ORDER BY created_at, id"
        };
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(target_from_row).collect()
    }

    async fn update_target(
        &self,
        id: &str,
        update: &TargetUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<MonitoredTarget>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query("SELECT * FROM targets WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut target = target_from_row(&row)?;
        update.apply(&mut target, now);

        sqlx::query(
            r#"
            UPDATE targets SET name = ?, url = ?, selector = ?, xpath = ?, interval_secs = ?,
                               max_pages = ?, is_active = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&target.name)
        .bind(&target.url)
        .bind(&target.selector)
        .bind(&target.xpath)
        .bind(target.interval_secs as i64)
        .bind(target.max_pages as i64)
        .bind(target.is_active as i64)
        .bind(to_millis(target.updated_at))
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(Some(target))
    }

    async fn record_check(
        &self,
        id: &str,
        fingerprint: Option<&str>,
        snapshot: Option<&str>,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE targets
            SET last_fingerprint = COALESCE(?, last_fingerprint),
                last_snapshot = COALESCE(?, last_snapshot),
                last_checked_at = ?
            WHERE id = ?
            "#,
        )
        .bind(fingerprint)
        .bind(snapshot)
        .bind(to_millis(checked_at))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_target(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM change_records WHERE target_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM subscriptions WHERE target_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let removed = sqlx::query("DELETE FROM targets WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();

        tx.commit().await.map_err(db_err)?;
        Ok(removed > 0)
    }

    async fn insert_change(&self, record: &ChangeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO change_records (id, target_id, old_preview, new_preview, summary, detected_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.target_id)
        .bind(&record.old_preview)
        .bind(&record.new_preview)
        .bind(&record.summary)
        .bind(to_millis(record.detected_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_changes(&self, target_id: &str, limit: usize) -> Result<Vec<ChangeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, target_id, old_preview, new_preview, summary, detected_at
            FROM change_records WHERE target_id = ?
            ORDER BY detected_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(target_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .iter()
            .map(|row| ChangeRecord {
                id: row.get("id"),
                target_id: row.get("target_id"),
                old_preview: row.get("old_preview"),
                new_preview: row.get("new_preview"),
                summary: row.get("summary"),
                detected_at: from_millis(row.get("detected_at")),
            })
            .collect())
    }

    async fn add_subscription(&self, subscription: &Subscription) -> Result<()> {
        sqlx::query(
            "INSERT INTO subscriptions (id, target_id, email, is_active, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&subscription.id)
        .bind(&subscription.target_id)
        .bind(&subscription.email)
        .bind(subscription.is_active as i64)
        .bind(to_millis(subscription.created_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_subscription_active(&self, id: &str, active: bool) -> Result<bool> {
        let updated = sqlx::query("UPDATE subscriptions SET is_active = ? WHERE id = ?")
            .bind(active as i64)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected();
        Ok(updated > 0)
    }

    async fn list_subscriptions(&self, target_id: &str) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            "SELECT id, target_id, email, is_active, created_at FROM subscriptions WHERE target_id = ? ORDER BY created_at, rowid",
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(subscription_from_row).collect())
    }
}
