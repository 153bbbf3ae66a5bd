//! In-memory [`ChunkStore`] and [`RecordStore`] for tests and embedding.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity over the target's stored vectors.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::embedding::cosine_similarity;
use crate::error::{Result, WatchError};
use crate::models::{
    ChangeRecord, Chunk, IndexStats, MonitoredTarget, ScoredChunk, Subscription, TargetUpdate,
};

use super::{rank, ChunkStore, RecordStore};

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
    _model: String,
}

/// In-memory store implementing both storage traits.
pub struct InMemoryStore {
    // Append order doubles as session age.
    chunks: RwLock<Vec<StoredChunk>>,
    targets: RwLock<HashMap<String, MonitoredTarget>>,
    changes: RwLock<Vec<ChangeRecord>>,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            targets: RwLock::new(HashMap::new()),
            changes: RwLock::new(Vec::new()),
            subscriptions: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<E>(_: E) -> WatchError {
    WatchError::storage("in-memory store lock poisoned")
}

/// Session ids of a target, oldest first.
fn sessions_in_order(chunks: &[StoredChunk], target_id: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    for sc in chunks.iter().filter(|sc| sc.chunk.target_id == target_id) {
        if seen.insert(sc.chunk.session_id.as_str()) {
            order.push(sc.chunk.session_id.clone());
        }
    }
    order
}

#[async_trait]
impl ChunkStore for InMemoryStore {
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
        let mut stored = self.chunks.write().map_err(poisoned)?;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            stored.push(StoredChunk {
                chunk: chunk.clone(),
                vector: vector.clone(),
                _model: model.to_string(),
            });
        }
        Ok(())
    }

    async fn count(&self, target_id: &str) -> Result<usize> {
        let stored = self.chunks.read().map_err(poisoned)?;
        Ok(stored
            .iter()
            .filter(|sc| sc.chunk.target_id == target_id)
            .count())
    }

    async fn nearest(
        &self,
        target_id: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let stored = self.chunks.read().map_err(poisoned)?;
        let scored = stored
            .iter()
            .filter(|sc| sc.chunk.target_id == target_id)
            .map(|sc| ScoredChunk {
                chunk: sc.chunk.clone(),
                similarity: cosine_similarity(query, &sc.vector),
            })
            .collect();
        Ok(rank(scored, limit))
    }

    async fn stats(&self, target_id: &str) -> Result<IndexStats> {
        let stored = self.chunks.read().map_err(poisoned)?;
        let mut urls: Vec<String> = Vec::new();
        let mut total = 0;
        for sc in stored.iter().filter(|sc| sc.chunk.target_id == target_id) {
            total += 1;
            if !urls.contains(&sc.chunk.source_url) {
                urls.push(sc.chunk.source_url.clone());
            }
        }
        urls.sort();
        Ok(IndexStats {
            target_id: target_id.to_string(),
            total_chunks: total,
            sessions: sessions_in_order(&stored, target_id).len(),
            unique_urls: urls.len(),
            urls,
        })
    }

    async fn retain_sessions(&self, target_id: &str, keep: usize) -> Result<usize> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        let sessions = sessions_in_order(&stored, target_id);
        if sessions.len() <= keep {
            return Ok(0);
        }
        let expired: HashSet<String> = sessions[..sessions.len() - keep].iter().cloned().collect();
        let before = stored.len();
        stored.retain(|sc| {
            !(sc.chunk.target_id == target_id && expired.contains(&sc.chunk.session_id))
        });
        Ok(before - stored.len())
    }

    async fn purge(&self, target_id: &str) -> Result<usize> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        let before = stored.len();
        stored.retain(|sc| sc.chunk.target_id != target_id);
        Ok(before - stored.len())
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert_target(&self, target: &MonitoredTarget) -> Result<()> {
        let mut targets = self.targets.write().map_err(poisoned)?;
        targets.insert(target.id.clone(), target.clone());
        Ok(())
    }

    async fn get_target(&self, id: &str) -> Result<Option<MonitoredTarget>> {
        let targets = self.targets.read().map_err(poisoned)?;
        Ok(targets.get(id).cloned())
    }

    async fn list_targets(&self, active_only: bool) -> Result<Vec<MonitoredTarget>> {
        let targets = self.targets.read().map_err(poisoned)?;
        let mut list: Vec<MonitoredTarget> = targets
            .values()
            .filter(|t| !active_only || t.is_active)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn update_target(
        &self,
        id: &str,
        update: &TargetUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<MonitoredTarget>> {
        let mut targets = self.targets.write().map_err(poisoned)?;
        Ok(targets.get_mut(id).map(|t| {
            update.apply(t, now);
            t.clone()
        }))
    }

    async fn record_check(
        &self,
        id: &str,
        fingerprint: Option<&str>,
        snapshot: Option<&str>,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut targets = self.targets.write().map_err(poisoned)?;
        if let Some(t) = targets.get_mut(id) {
            if let Some(fp) = fingerprint {
                t.last_fingerprint = Some(fp.to_string());
            }
            if let Some(text) = snapshot {
                t.last_snapshot = Some(text.to_string());
            }
            t.last_checked_at = Some(checked_at);
        }
        Ok(())
    }

    async fn delete_target(&self, id: &str) -> Result<bool> {
        let removed = self.targets.write().map_err(poisoned)?.remove(id).is_some();
        self.changes
            .write()
            .map_err(poisoned)?
            .retain(|c| c.target_id != id);
        self.subscriptions
            .write()
            .map_err(poisoned)?
            .retain(|s| s.target_id != id);
        Ok(removed)
    }

    async fn insert_change(&self, record: &ChangeRecord) -> Result<()> {
        self.changes.write().map_err(poisoned)?.push(record.clone());
        Ok(())
    }

    async fn list_changes(&self, target_id: &str, limit: usize) -> Result<Vec<ChangeRecord>> {
        let changes = self.changes.read().map_err(poisoned)?;
        Ok(changes
            .iter()
            .rev()
            .filter(|c| c.target_id == target_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn add_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.subscriptions
            .write()
            .map_err(poisoned)?
            .push(subscription.clone());
        Ok(())
    }

    async fn set_subscription_active(&self, id: &str, active: bool) -> Result<bool> {
        let mut subs = self.subscriptions.write().map_err(poisoned)?;
        match subs.iter_mut().find(|s| s.id == id) {
            Some(s) => {
                s.is_active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_subscriptions(&self, target_id: &str) -> Result<Vec<Subscription>> {
        let subs = self.subscriptions.read().map_err(poisoned)?;
        Ok(subs
            .iter()
            .filter(|s| s.target_id == target_id)
            .cloned()
            .collect())
    }
}
