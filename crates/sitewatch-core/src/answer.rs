//! Grounded question answering over a target's retrieval index.
//!
//! # Pipeline
//!
//! ```text
//! question ─▶ index.query(top_k) ─▶ noise filter ─▶ context (≤ 3000 chars)
//!                 │ empty                 │ all noise
//!                 ▼                       ▼
//!          NO_INFORMATION          first 2 unfiltered chunks
//!
//! context ─▶ strict prompt ─▶ completion ─▶ answer | fixed fallback
//! ```
//!
//! End users only ever see the completion text or one of the fixed
//! messages below. Index failures are returned as errors for the operator.

use crate::error::Result;
use crate::index::RetrievalIndex;
use crate::models::{Answer, ScoredChunk};
use crate::text::truncate_chars;
use crate::traits::CompletionProvider;

pub const NO_INFORMATION: &str =
    "I don't have specific information about that in my knowledge base. Could you ask something else?";
pub const EMPTY_COMPLETION: &str =
    "I'm having trouble generating a response. Please try rephrasing your question.";
pub const COMPLETION_FAILED: &str =
    "Sorry, I encountered an error generating a response. Please try again.";

/// Lowercase phrases that mark a chunk as site chrome rather than content.
const BOILERPLATE_PHRASES: &[&str] = &[
    "copyright",
    "powered by",
    "quick links",
    "follow us",
    "privacy policy",
    "terms & condition",
    "whatsapp us",
];

/// Completion outputs starting with these are error reports, not answers.
const ERROR_MARKERS: &[&str] = &["Error:", "❌"];

#[derive(Debug, Clone, Copy)]
pub struct AnswerOptions {
    pub top_k: usize,
    pub min_useful_chars: usize,
    pub max_context_chunks: usize,
    pub max_context_chars: usize,
    pub fallback_chunks: usize,
    pub max_tokens: u32,
}

impl Default for AnswerOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_useful_chars: 100,
            max_context_chunks: 5,
            max_context_chars: 3000,
            fallback_chunks: 2,
            max_tokens: 500,
        }
    }
}

fn is_boilerplate(text: &str) -> bool {
    let lower = text.to_lowercase();
    BOILERPLATE_PHRASES.iter().any(|p| lower.contains(p))
}

/// Pick the chunk texts used as context, in retrieval order.
///
/// Drops short and boilerplate chunks; if nothing survives, falls back to
/// the first `fallback_chunks` results unfiltered.
pub fn select_context<'a>(hits: &'a [ScoredChunk], opts: &AnswerOptions) -> Vec<&'a str> {
    let useful: Vec<&str> = hits
        .iter()
        .map(|h| h.chunk.text.as_str())
        .filter(|t| t.chars().count() >= opts.min_useful_chars && !is_boilerplate(t))
        .take(opts.max_context_chunks)
        .collect();
    if !useful.is_empty() {
        return useful;
    }
    hits.iter()
        .take(opts.fallback_chunks.min(opts.max_context_chunks))
        .map(|h| h.chunk.text.as_str())
        .collect()
}

pub fn build_answer_prompt(context: &str, question: &str) -> String {
    format!(
        "You are answering questions about website content. Answer based ONLY on the context below.\n\n\
         CONTEXT:\n{}\n\n\
         QUESTION: {}\n\n\
         CRITICAL RULES:\n\
         1. Use ONLY information from the context above\n\
         2. Answer in 2-3 clear, concise sentences\n\
         3. If the answer is not in the context, say: \"I don't have that information in the provided content.\"\n\
         4. Do NOT make assumptions or add information not in the context\n\
         5. Be helpful and direct\n\n\
         ANSWER:",
        context, question
    )
}

/// Answer `question` from the index of `target_id`.
///
/// `source_url` is reported back with the answer. Completion problems are
/// masked with a fixed message; index errors are returned.
pub async fn answer_question(
    index: &RetrievalIndex,
    completion: &dyn CompletionProvider,
    target_id: &str,
    source_url: &str,
    question: &str,
    opts: &AnswerOptions,
) -> Result<Answer> {
    let hits = index.query(target_id, question, opts.top_k).await?;
    if hits.is_empty() {
        return Ok(Answer {
            text: NO_INFORMATION.to_string(),
            chunks_used: 0,
            source_url: source_url.to_string(),
        });
    }

    let selected = select_context(&hits, opts);
    let chunks_used = selected.len();
    let context = selected.join("\n\n");
    let prompt = build_answer_prompt(truncate_chars(&context, opts.max_context_chars), question);
    tracing::debug!(target_id, chunks_used, context_chars = context.chars().count(), "answering");

    let text = match completion.complete(&prompt, opts.max_tokens).await {
        Ok(reply) => {
            let reply = reply.trim();
            if reply.is_empty() {
                tracing::warn!(target_id, "empty answer from completion provider");
                EMPTY_COMPLETION.to_string()
            } else if ERROR_MARKERS.iter().any(|m| reply.starts_with(m)) {
                tracing::warn!(target_id, reply, "completion provider returned an error marker");
                COMPLETION_FAILED.to_string()
            } else {
                reply.to_string()
            }
        }
        Err(e) => {
            tracing::warn!(target_id, error = %e, "answer generation failed");
            COMPLETION_FAILED.to_string()
        }
    };

    Ok(Answer {
        text,
        chunks_used,
        source_url: source_url.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::Chunk;

    fn hit(text: &str, similarity: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: text.chars().take(8).collect(),
                target_id: "t".into(),
                session_id: "s".into(),
                sequence_index: 0,
                text: text.into(),
                source_url: "https://example.com".into(),
                selector_used: None,
                hash: String::new(),
                created_at: Utc::now(),
            },
            similarity,
        }
    }

    fn long(prefix: &str) -> String {
        format!("{} {}", prefix, "useful details about the service ".repeat(5))
    }

    #[test]
    fn test_short_and_boilerplate_dropped() {
        let hits = vec![
            hit("too short", 0.9),
            hit(&long("Copyright 2024 Example Corp."), 0.8),
            hit(&long("Opening hours"), 0.7),
            hit(&long("Follow us on social media"), 0.6),
        ];
        let ctx = select_context(&hits, &AnswerOptions::default());
        assert_eq!(ctx.len(), 1);
        assert!(ctx[0].starts_with("Opening hours"));
    }

    #[test]
    fn test_all_noise_falls_back_to_first_two() {
        let hits = vec![
            hit(&long("copyright a"), 0.9),
            hit(&long("copyright b"), 0.8),
            hit(&long("copyright c"), 0.7),
        ];
        let ctx = select_context(&hits, &AnswerOptions::default());
        assert_eq!(ctx.len(), 2);
        assert!(ctx[0].starts_with("copyright a"));
        assert!(ctx[1].starts_with("copyright b"));
    }

    #[test]
    fn test_context_capped_at_five_chunks() {
        let hits: Vec<ScoredChunk> = (0..8)
            .map(|i| hit(&long(&format!("Item {}", i)), 1.0 - i as f32 / 10.0))
            .collect();
        let ctx = select_context(&hits, &AnswerOptions::default());
        assert_eq!(ctx.len(), 5);
    }

    #[test]
    fn test_prompt_contains_rules_and_question() {
        let prompt = build_answer_prompt("ctx text", "When do you open?");
        assert!(prompt.contains("CONTEXT:\nctx text"));
        assert!(prompt.contains("QUESTION: When do you open?"));
        assert!(prompt.contains("I don't have that information in the provided content."));
        assert!(prompt.ends_with("ANSWER:"));
    }
}
