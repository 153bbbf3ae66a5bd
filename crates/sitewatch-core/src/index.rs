//! Per-target retrieval index.
//!
//! [`RetrievalIndex`] combines the chunker, an [`EmbeddingProvider`] and a
//! [`ChunkStore`]. Every upsert creates a new session; earlier sessions
//! are kept unless a retention limit is configured.
//!
//! All failures surface as [`WatchError::Index`]: a broken index silently
//! degrades every later answer, so nothing here is masked.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::chunk::{make_chunks, split_text, ChunkOptions, ChunkSource};
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, WatchError};
use crate::models::{IndexStats, ScoredChunk};
use crate::store::ChunkStore;

/// Provenance attached to every chunk of a session.
#[derive(Debug, Clone)]
pub struct SessionMeta<'a> {
    pub source_url: &'a str,
    pub selector_used: Option<&'a str>,
    pub scraped_at: DateTime<Utc>,
}

/// Outcome of an upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertSummary {
    pub session_id: String,
    pub chunks: usize,
    /// Chunks removed from older sessions by the retention limit.
    pub retired: usize,
}

pub struct RetrievalIndex {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    options: ChunkOptions,
    batch_size: usize,
    retain_sessions: Option<usize>,
}

impl RetrievalIndex {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        options: ChunkOptions,
    ) -> Self {
        Self {
            store,
            embedder,
            options,
            batch_size: 64,
            retain_sessions: None,
        }
    }

    /// Maximum texts per embedding call.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Keep at most `keep` sessions per target; `None` accumulates.
    pub fn with_retention(mut self, keep: Option<usize>) -> Self {
        self.retain_sessions = keep.map(|k| k.max(1));
        self
    }

    pub fn options(&self) -> &ChunkOptions {
        &self.options
    }

    /// Whether the embedder can index at all.
    pub fn is_enabled(&self) -> bool {
        self.embedder.is_enabled()
    }

    /// Chunk, embed and store `text` as a new session of `target_id`.
    ///
    /// Text that yields no chunk above the minimum length stores nothing
    /// and is not an error.
    pub async fn upsert(
        &self,
        target_id: &str,
        text: &str,
        meta: &SessionMeta<'_>,
    ) -> Result<UpsertSummary> {
        let session_id = Uuid::new_v4().to_string();
        let pieces = split_text(text, &self.options);
        if pieces.is_empty() {
            tracing::debug!(target_id, "nothing to index after chunking");
            return Ok(UpsertSummary {
                session_id,
                chunks: 0,
                retired: 0,
            });
        }

        let chunks = make_chunks(
            pieces,
            &ChunkSource {
                target_id,
                session_id: &session_id,
                source_url: meta.source_url,
                selector_used: meta.selector_used,
                created_at: meta.scraped_at,
            },
        );

        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = self.embedder.embed(&texts).await.map_err(as_index_error)?;
            if embedded.len() != batch.len() {
                return Err(WatchError::index(format!(
                    "embedding provider returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);
        }

        self.store
            .insert_session(&chunks, &vectors, self.embedder.model_name())
            .await
            .map_err(as_index_error)?;

        let retired = match self.retain_sessions {
            Some(keep) => self
                .store
                .retain_sessions(target_id, keep)
                .await
                .map_err(as_index_error)?,
            None => 0,
        };

        tracing::debug!(target_id, session_id = %session_id, chunks = chunks.len(), retired, "indexed session");
        Ok(UpsertSummary {
            session_id,
            chunks: chunks.len(),
            retired,
        })
    }

    /// Up to `top_k` chunks of `target_id` most similar to `query`.
    ///
    /// An empty index yields an empty result without calling the embedder.
    pub async fn query(
        &self,
        target_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let stored = self.store.count(target_id).await.map_err(as_index_error)?;
        let limit = top_k.min(stored);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut vectors = self
            .embedder
            .embed(&[query.to_string()])
            .await
            .map_err(as_index_error)?;
        let query_vec = vectors
            .pop()
            .ok_or_else(|| WatchError::index("embedding provider returned no vector for query"))?;

        self.store
            .nearest(target_id, &query_vec, limit)
            .await
            .map_err(as_index_error)
    }

    pub async fn stats(&self, target_id: &str) -> Result<IndexStats> {
        self.store.stats(target_id).await.map_err(as_index_error)
    }

    /// Remove everything indexed for `target_id`. Idempotent.
    pub async fn purge(&self, target_id: &str) -> Result<usize> {
        self.store.purge(target_id).await.map_err(as_index_error)
    }
}

/// Storage faults inside the index are index faults to callers.
fn as_index_error(err: WatchError) -> WatchError {
    match err {
        WatchError::Index(_) => err,
        other => WatchError::index(other),
    }
}
