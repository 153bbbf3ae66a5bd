//! Storage abstraction for sitewatch.
//!
//! Two traits split persistence along its two very different access
//! patterns:
//!
//! | Trait | Holds | Written by |
//! |-------|-------|------------|
//! | [`ChunkStore`] | chunks + embedding vectors, grouped by session | [`RetrievalIndex`](crate::index::RetrievalIndex) |
//! | [`RecordStore`] | targets, change records, subscriptions | monitor and watcher |
//!
//! Implementations must be `Send + Sync`. The app crate provides a SQLite
//! backend; [`memory::InMemoryStore`] implements both traits for tests.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    ChangeRecord, Chunk, IndexStats, MonitoredTarget, ScoredChunk, Subscription, TargetUpdate,
};

/// Chunk and vector storage backing the retrieval index.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_session`](ChunkStore::insert_session) | Append one scrape session atomically |
/// | [`count`](ChunkStore::count) | Stored chunks for a target |
/// | [`nearest`](ChunkStore::nearest) | Cosine-similarity search |
/// | [`stats`](ChunkStore::stats) | Chunk, session and URL counts |
/// | [`retain_sessions`](ChunkStore::retain_sessions) | Drop all but the newest N sessions |
/// | [`purge`](ChunkStore::purge) | Delete everything for a target |
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Append a session's chunks with one vector per chunk.
    ///
    /// All chunks become visible together or not at all. Existing sessions
    /// are never touched.
    async fn insert_session(&self, chunks: &[Chunk], vectors: &[Vec<f32>], model: &str)
        -> Result<()>;

    async fn count(&self, target_id: &str) -> Result<usize>;

    /// Up to `limit` chunks of `target_id` ordered by descending similarity.
    async fn nearest(&self, target_id: &str, query: &[f32], limit: usize)
        -> Result<Vec<ScoredChunk>>;

    async fn stats(&self, target_id: &str) -> Result<IndexStats>;

    /// Keep only the newest `keep` sessions. Returns chunks removed.
    async fn retain_sessions(&self, target_id: &str, keep: usize) -> Result<usize>;

    /// Delete every chunk and vector for `target_id`. Returns chunks
    /// removed; purging an empty target is not an error.
    async fn purge(&self, target_id: &str) -> Result<usize>;
}

/// Record storage for targets, change history and subscriptions.
///
/// Lookups of a missing id return `Ok(None)` / `Ok(false)`; errors are
/// reserved for storage faults.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_target(&self, target: &MonitoredTarget) -> Result<()>;

    async fn get_target(&self, id: &str) -> Result<Option<MonitoredTarget>>;

    async fn list_targets(&self, active_only: bool) -> Result<Vec<MonitoredTarget>>;

    /// Apply `update` and return the updated target.
    async fn update_target(
        &self,
        id: &str,
        update: &TargetUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<MonitoredTarget>>;

    /// Record a completed check. `None` for `fingerprint` or `snapshot`
    /// leaves the stored value untouched.
    async fn record_check(
        &self,
        id: &str,
        fingerprint: Option<&str>,
        snapshot: Option<&str>,
        checked_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Delete a target with its change records and subscriptions.
    async fn delete_target(&self, id: &str) -> Result<bool>;

    async fn insert_change(&self, record: &ChangeRecord) -> Result<()>;

    /// Change records for a target, newest first.
    async fn list_changes(&self, target_id: &str, limit: usize) -> Result<Vec<ChangeRecord>>;

    async fn add_subscription(&self, subscription: &Subscription) -> Result<()>;

    async fn set_subscription_active(&self, id: &str, active: bool) -> Result<bool>;

    async fn list_subscriptions(&self, target_id: &str) -> Result<Vec<Subscription>>;
}

/// Sort helper shared by store implementations: descending similarity,
/// ties broken by sequence index.
pub fn rank(mut scored: Vec<ScoredChunk>, limit: usize) -> Vec<ScoredChunk> {
    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk.sequence_index.cmp(&b.chunk.sequence_index))
    });
    scored.truncate(limit);
    scored
}
