//! Language-model summaries of a detected change.
//!
//! Summarization never fails: a completion error or an empty completion
//! yields [`FALLBACK_SUMMARY`] so detection and notification proceed.

use crate::text::truncate_chars;
use crate::traits::CompletionProvider;

/// Used whenever the completion capability cannot produce a summary.
pub const FALLBACK_SUMMARY: &str = "Content has been updated. Please check the website for details.";

/// Bounds for the summary prompt and output.
#[derive(Debug, Clone, Copy)]
pub struct SummaryOptions {
    /// Chars kept from each of the old and new snapshots.
    pub input_chars: usize,
    pub max_tokens: u32,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            input_chars: 1500,
            max_tokens: 150,
        }
    }
}

pub fn build_summary_prompt(old_text: &str, new_text: &str, input_chars: usize) -> String {
    format!(
        "Compare these two versions of website content and summarize what changed.\n\n\
         OLD VERSION:\n{}\n\n\
         NEW VERSION:\n{}\n\n\
         Provide a concise summary (2-3 sentences) of the main changes. Focus on:\n\
         - New information added\n\
         - Information removed or changed\n\
         - Major updates\n\n\
         Summary:",
        truncate_chars(old_text, input_chars),
        truncate_chars(new_text, input_chars),
    )
}

/// Summarize the difference between two snapshots.
pub async fn summarize_change(
    completion: &dyn CompletionProvider,
    old_text: &str,
    new_text: &str,
    opts: &SummaryOptions,
) -> String {
    let prompt = build_summary_prompt(old_text, new_text, opts.input_chars);
    match completion.complete(&prompt, opts.max_tokens).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => {
            tracing::warn!("empty change summary from completion provider, using fallback");
            FALLBACK_SUMMARY.to_string()
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not generate change summary, using fallback");
            FALLBACK_SUMMARY.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{Result, WatchError};

    struct Scripted {
        reply: Result<String>,
        prompts: Mutex<Vec<(String, u32)>>,
    }

    impl Scripted {
        fn new(reply: Result<String>) -> Self {
            Self {
                reply,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for Scripted {
        async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.to_string(), max_tokens));
            match &self.reply {
                Ok(s) => Ok(s.clone()),
                Err(e) => Err(WatchError::completion(e)),
            }
        }
    }

    #[tokio::test]
    async fn test_summary_is_trimmed() {
        let llm = Scripted::new(Ok("  Prices went down.\n".into()));
        let s = summarize_change(&llm, "old", "new", &SummaryOptions::default()).await;
        assert_eq!(s, "Prices went down.");
        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts[0].1, 150);
        assert!(prompts[0].0.contains("OLD VERSION:\nold"));
        assert!(prompts[0].0.contains("NEW VERSION:\nnew"));
    }

    #[tokio::test]
    async fn test_failure_falls_back() {
        let llm = Scripted::new(Err(WatchError::completion("rate limited")));
        let s = summarize_change(&llm, "a", "b", &SummaryOptions::default()).await;
        assert_eq!(s, FALLBACK_SUMMARY);
    }

    #[tokio::test]
    async fn test_empty_completion_falls_back() {
        let llm = Scripted::new(Ok("   ".into()));
        let s = summarize_change(&llm, "a", "b", &SummaryOptions::default()).await;
        assert_eq!(s, FALLBACK_SUMMARY);
    }

    #[test]
    fn test_prompt_truncates_inputs() {
        let old = "o".repeat(2000);
        let new = "n".repeat(2000);
        let prompt = build_summary_prompt(&old, &new, 1500);
        assert!(prompt.contains(&"o".repeat(1500)));
        assert!(!prompt.contains(&"o".repeat(1501)));
        assert!(!prompt.contains(&"n".repeat(1501)));
    }
}
