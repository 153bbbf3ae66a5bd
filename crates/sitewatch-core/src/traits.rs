//! Capability traits for the external collaborators of the pipeline.
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │                 Monitor                    │
//! │  ┌─────────────┐ ┌─────────────┐ ┌───────┐ │
//! │  │ PageFetcher │ │ Completion  │ │Notifier│ │
//! │  │ (HTTP)      │ │ (LLM)       │ │(email) │ │
//! │  └─────────────┘ └─────────────┘ └───────┘ │
//! └────────────────────────────────────────────┘
//! ```
//!
//! The app crate provides the network-backed implementations; tests use
//! the doubles in `sitewatch::testing`.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Notification;

// ═══════════════════════════════════════════════════════════════════════
// Page fetching
// ═══════════════════════════════════════════════════════════════════════

/// Fetch the HTML for a URL.
///
/// Timeouts, navigation failures and non-2xx responses are reported as
/// [`WatchError::Fetch`](crate::WatchError::Fetch).
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

// ═══════════════════════════════════════════════════════════════════════
// Completion
// ═══════════════════════════════════════════════════════════════════════

/// Send a prompt to a language model and return the generated text.
///
/// Implementations report failures as
/// [`WatchError::Completion`](crate::WatchError::Completion). Callers
/// treat an empty completion the same as a failure.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

// ═══════════════════════════════════════════════════════════════════════
// Notification
// ═══════════════════════════════════════════════════════════════════════

/// Deliver a notification to its recipient.
///
/// Delivery errors are returned, but callers in the detection pipeline
/// log them and carry on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}
