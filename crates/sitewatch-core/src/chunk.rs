//! Line-boundary text chunker with overlap.
//!
//! Splits extracted page text into retrieval-sized pieces. All sizes are
//! character counts.
//!
//! # Algorithm
//!
//! 1. Text shorter than `chunk_size` becomes a single chunk.
//! 2. Otherwise split on `\n` into paragraphs, dropping blank ones.
//!    Paragraphs longer than `chunk_size` are pre-split at the last space
//!    before the limit (a hard cut only when a single word is too long).
//! 3. Greedily join paragraphs with a space while the running chunk stays
//!    within `chunk_size`.
//! 4. When the next paragraph does not fit, close the running chunk and
//!    seed the next one with the closed chunk's last `overlap` chars,
//!    starting after the first whitespace so no partial word is repeated.
//! 5. Drop every chunk shorter than `min_chars`.
//!
//! Every emitted chunk is between `min_chars` and `chunk_size + overlap`
//! chars long.
//!
//! # Example
//!
//! ```rust
//! use sitewatch_core::chunk::{split_text, ChunkOptions};
//!
//! let text = "A single short paragraph that is long enough to be kept as a chunk.";
//! let pieces = split_text(text, &ChunkOptions::default());
//! assert_eq!(pieces, vec![text.to_string()]);
//! ```

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;
use crate::text::{char_len, tail_chars, truncate_chars};

/// Chunk sizing, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub chunk_size: usize,
    pub overlap: usize,
    pub min_chars: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: 600,
            overlap: 50,
            min_chars: 50,
        }
    }
}

/// Split `text` into chunk texts.
pub fn split_text(text: &str, opts: &ChunkOptions) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let chunk_size = opts.chunk_size.max(1);
    if char_len(text) < chunk_size {
        return keep_long_enough(vec![text.to_string()], opts.min_chars);
    }

    let mut paragraphs = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        hard_split(line, chunk_size, &mut paragraphs);
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for para in paragraphs {
        let para_len = char_len(para);
        if !current.is_empty() && current_len + para_len + 1 > chunk_size {
            let seed = overlap_seed(&current, current_len, opts.overlap);
            chunks.push(std::mem::take(&mut current));
            if let Some(seed) = seed {
                current_len = char_len(&seed);
                current = seed;
            } else {
                current_len = 0;
            }
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(para);
        current_len += para_len;
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }

    keep_long_enough(chunks, opts.min_chars)
}

/// The tail of a closed chunk used to start the next one.
///
/// Takes the last `overlap` chars, then discards everything up to and
/// including the first whitespace so the seed starts on a word boundary.
/// Returns `None` when no whole word survives.
fn overlap_seed(closed: &str, closed_len: usize, overlap: usize) -> Option<String> {
    if overlap == 0 || closed_len <= overlap {
        return None;
    }
    let tail = tail_chars(closed, overlap).trim();
    let (_, after) = tail.split_once(char::is_whitespace)?;
    let seed = after.trim();
    if seed.is_empty() {
        None
    } else {
        Some(seed.to_string())
    }
}

/// Push `para` onto `out`, split into pieces of at most `max` chars.
fn hard_split<'a>(para: &'a str, max: usize, out: &mut Vec<&'a str>) {
    let mut remaining = para;
    while char_len(remaining) > max {
        let window = truncate_chars(remaining, max);
        // Break after the last space inside the window; a window that is a
        // single word is cut at the limit.
        let cut = match window.rfind(char::is_whitespace) {
            Some(pos) if pos > 0 => pos,
            _ => window.len(),
        };
        let piece = remaining[..cut].trim_end();
        if !piece.is_empty() {
            out.push(piece);
        }
        remaining = remaining[cut..].trim_start();
    }
    if !remaining.is_empty() {
        out.push(remaining);
    }
}

fn keep_long_enough(chunks: Vec<String>, min_chars: usize) -> Vec<String> {
    chunks
        .into_iter()
        .filter(|c| char_len(c) >= min_chars)
        .collect()
}

/// SHA-256 hex digest of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Where a session's chunks came from.
#[derive(Debug, Clone)]
pub struct ChunkSource<'a> {
    pub target_id: &'a str,
    pub session_id: &'a str,
    pub source_url: &'a str,
    pub selector_used: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

/// Wrap chunk texts into [`Chunk`] records with contiguous indices.
pub fn make_chunks(pieces: Vec<String>, source: &ChunkSource<'_>) -> Vec<Chunk> {
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, text)| Chunk {
            id: Uuid::new_v4().to_string(),
            target_id: source.target_id.to_string(),
            session_id: source.session_id.to_string(),
            sequence_index: i as i64,
            hash: content_hash(&text),
            text,
            source_url: source.source_url.to_string(),
            selector_used: source.selector_used.map(str::to_string),
            created_at: source.created_at,
        })
        .collect()
}
