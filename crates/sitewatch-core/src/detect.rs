//! Fingerprint-based change classification.
//!
//! The fingerprint is the SHA-256 of the cleaned extracted text. Any
//! difference after cleanup counts as a change, including whitespace-only
//! edits inside a line.

use crate::chunk::content_hash;
use crate::models::CheckStatus;

/// Fingerprint of extracted page text.
pub fn fingerprint(text: &str) -> String {
    content_hash(text)
}

/// Classification of one fresh extraction against the stored fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// No previous fingerprint. Store this one; nothing to report.
    Baseline { fingerprint: String },
    /// Same content as last time. Refresh the timestamp only.
    Unchanged { fingerprint: String },
    /// Content differs from the stored fingerprint.
    Changed {
        previous: String,
        fingerprint: String,
    },
    /// Extraction produced no text. The stored fingerprint must be kept.
    NoContent,
}

impl Detection {
    pub fn status(&self) -> CheckStatus {
        match self {
            Detection::Baseline { .. } => CheckStatus::Baseline,
            Detection::Unchanged { .. } => CheckStatus::Unchanged,
            Detection::Changed { .. } => CheckStatus::Changed,
            Detection::NoContent => CheckStatus::NoContent,
        }
    }

    /// The fingerprint to persist, if any.
    pub fn fingerprint(&self) -> Option<&str> {
        match self {
            Detection::Baseline { fingerprint }
            | Detection::Unchanged { fingerprint }
            | Detection::Changed { fingerprint, .. } => Some(fingerprint),
            Detection::NoContent => None,
        }
    }
}

/// Classify `text` against the previous fingerprint.
pub fn classify(previous: Option<&str>, text: &str) -> Detection {
    if text.trim().is_empty() {
        return Detection::NoContent;
    }
    let current = fingerprint(text);
    match previous {
        None => Detection::Baseline {
            fingerprint: current,
        },
        Some(prev) if prev == current => Detection::Unchanged {
            fingerprint: current,
        },
        Some(prev) => Detection::Changed {
            previous: prev.to_string(),
            fingerprint: current,
        },
    }
}
