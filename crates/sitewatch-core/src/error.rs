//! Error taxonomy shared by every sitewatch component.
//!
//! Each variant corresponds to one failure class of the monitoring and
//! retrieval pipeline. Callers decide per class whether an error is masked
//! (summaries, answers), converted into a result status (scheduled and
//! manual checks) or surfaced (index and storage faults).

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = WatchError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum WatchError {
    /// Network, navigation or non-2xx failure while fetching a page.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Extraction produced no text. A soft failure, not a fault.
    #[error("no content extracted")]
    NoContent,

    /// The language-model call failed or returned nothing usable.
    #[error("completion failed: {0}")]
    Completion(String),

    /// Embedding or retrieval-index storage failure.
    #[error("index error: {0}")]
    Index(String),

    /// Persistence failure for targets, change records or subscriptions.
    #[error("storage error: {0}")]
    Storage(String),

    /// Bad input at the boundary (interval, URL, selector, email).
    #[error("invalid input: {0}")]
    Validation(String),
}

impl WatchError {
    pub fn fetch(err: impl std::fmt::Display) -> Self {
        Self::Fetch(err.to_string())
    }

    pub fn completion(err: impl std::fmt::Display) -> Self {
        Self::Completion(err.to_string())
    }

    pub fn index(err: impl std::fmt::Display) -> Self {
        Self::Index(err.to_string())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Stable machine-readable label for results and JSON bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            WatchError::Fetch(_) => "fetch_error",
            WatchError::NoContent => "no_content",
            WatchError::Completion(_) => "completion_error",
            WatchError::Index(_) => "index_error",
            WatchError::Storage(_) => "storage_error",
            WatchError::Validation(_) => "validation_error",
        }
    }

    /// Index and storage faults point at systemic problems and are never
    /// hidden behind a fallback.
    pub fn is_systemic(&self) -> bool {
        matches!(self, WatchError::Index(_) | WatchError::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        assert_eq!(WatchError::fetch("timeout").kind(), "fetch_error");
        assert_eq!(WatchError::NoContent.kind(), "no_content");
        assert_eq!(WatchError::validation("bad").kind(), "validation_error");
    }

    #[test]
    fn test_systemic() {
        assert!(WatchError::index("disk").is_systemic());
        assert!(WatchError::storage("locked").is_systemic());
        assert!(!WatchError::completion("429").is_systemic());
        assert!(!WatchError::fetch("dns").is_systemic());
    }

    #[test]
    fn test_display_includes_detail() {
        let e = WatchError::fetch("HTTP 503 for https://example.com");
        assert_eq!(e.to_string(), "fetch failed: HTTP 503 for https://example.com");
    }
}
