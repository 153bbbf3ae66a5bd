//! Core data models used throughout sitewatch.
//!
//! These types describe the monitored targets, the change history they
//! accumulate, the retrieval chunks produced from each scrape, and the
//! result shapes returned to callers of the public operations.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Who a target belongs to.
///
/// Agent-level scrape configs and standalone email reminders are
/// structurally identical targets; only the owner differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Owner {
    Agent { agent_id: String },
    Email { email: String },
}

impl Owner {
    pub fn kind(&self) -> &'static str {
        match self {
            Owner::Agent { .. } => "agent",
            Owner::Email { .. } => "email",
        }
    }

    /// The agent id or email address.
    pub fn reference(&self) -> &str {
        match self {
            Owner::Agent { agent_id } => agent_id,
            Owner::Email { email } => email,
        }
    }

    /// Rebuild an owner from its stored `(kind, reference)` pair.
    pub fn from_parts(kind: &str, reference: &str) -> Option<Self> {
        match kind {
            "agent" => Some(Owner::Agent {
                agent_id: reference.to_string(),
            }),
            "email" => Some(Owner::Email {
                email: reference.to_string(),
            }),
            _ => None,
        }
    }
}

/// A URL plus extraction rule and monitoring interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredTarget {
    pub id: String,
    pub owner: Owner,
    pub name: Option<String>,
    pub url: String,
    /// CSS selector; takes precedence over `xpath` when both match.
    pub selector: Option<String>,
    pub xpath: Option<String>,
    pub interval_secs: u64,
    /// Pages to crawl from `url`; 1 means the page alone.
    pub max_pages: u32,
    pub is_active: bool,
    pub last_fingerprint: Option<String>,
    /// Bounded text of the last good check; the "old" side of the next
    /// change summary.
    #[serde(default, skip_serializing)]
    pub last_snapshot: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MonitoredTarget {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Human label used in notifications and logs.
    pub fn display_name(&self) -> String {
        match (&self.name, &self.owner) {
            (Some(name), _) => name.clone(),
            (None, Owner::Email { .. }) => format!("Reminder: {}", self.url),
            (None, Owner::Agent { agent_id }) => format!("Agent {}", agent_id),
        }
    }

    /// Selector string recorded on chunks for provenance.
    pub fn selector_used(&self) -> Option<String> {
        self.selector.clone().or_else(|| self.xpath.clone())
    }
}

/// Input for creating a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTarget {
    pub owner: Owner,
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub xpath: Option<String>,
    pub interval_secs: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_max_pages() -> u32 {
    1
}

/// The caller-mutable fields of a target. `None` leaves a field untouched;
/// `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetUpdate {
    #[serde(default, deserialize_with = "present_or_null")]
    pub name: Option<Option<String>>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub selector: Option<Option<String>>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub xpath: Option<Option<String>>,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Distinguishes an explicit `null` (clear the field) from an absent key.
fn present_or_null<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

impl TargetUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.url.is_none()
            && self.selector.is_none()
            && self.xpath.is_none()
            && self.interval_secs.is_none()
            && self.max_pages.is_none()
            && self.is_active.is_none()
    }

    /// Apply the update to a target in place.
    pub fn apply(&self, target: &mut MonitoredTarget, now: DateTime<Utc>) {
        if let Some(name) = &self.name {
            target.name = name.clone();
        }
        if let Some(url) = &self.url {
            target.url = url.clone();
        }
        if let Some(selector) = &self.selector {
            target.selector = selector.clone();
        }
        if let Some(xpath) = &self.xpath {
            target.xpath = xpath.clone();
        }
        if let Some(interval) = self.interval_secs {
            target.interval_secs = interval;
        }
        if let Some(pages) = self.max_pages {
            target.max_pages = pages;
        }
        if let Some(active) = self.is_active {
            target.is_active = active;
        }
        target.updated_at = now;
    }
}

/// One detected change. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: String,
    pub target_id: String,
    pub old_preview: String,
    pub new_preview: String,
    pub summary: String,
    pub detected_at: DateTime<Utc>,
}

/// A bounded-length segment of extracted text stored for retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub target_id: String,
    pub session_id: String,
    pub sequence_index: i64,
    pub text: String,
    pub source_url: String,
    pub selector_used: Option<String>,
    /// SHA-256 of `text`.
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

/// A chunk returned from similarity search together with its score.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1.0, 1.0]`; higher is closer.
    pub similarity: f32,
}

/// Per-target index statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub target_id: String,
    pub total_chunks: usize,
    pub sessions: usize,
    pub unique_urls: usize,
    pub urls: Vec<String>,
}

/// An email subscription to a target's change notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub target_id: String,
    pub email: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Outcome class of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Baseline,
    Unchanged,
    Changed,
    NoContent,
    Skipped,
    Error,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Baseline => "baseline",
            CheckStatus::Unchanged => "unchanged",
            CheckStatus::Changed => "changed",
            CheckStatus::NoContent => "no_content",
            CheckStatus::Skipped => "skipped",
            CheckStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a scheduled or manual check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub target_id: String,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl CheckResult {
    pub fn new(target_id: &str, status: CheckStatus, checked_at: DateTime<Utc>) -> Self {
        Self {
            target_id: target_id.to_string(),
            status,
            summary: None,
            fingerprint: None,
            error_kind: None,
            error: None,
            checked_at,
        }
    }

    pub fn failed(target_id: &str, err: &crate::WatchError, checked_at: DateTime<Utc>) -> Self {
        Self {
            error_kind: Some(err.kind().to_string()),
            error: Some(err.to_string()),
            ..Self::new(target_id, CheckStatus::Error, checked_at)
        }
    }
}

/// Answer returned by the question-answer pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub chunks_used: usize,
    pub source_url: String,
}

/// Observability view of a scheduled job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledJob {
    pub job_key: String,
    pub target_id: String,
    pub interval_secs: u64,
    pub next_fire_time: DateTime<Utc>,
    pub running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Confirmation,
    Change,
}

/// A message handed to the notification capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    pub kind: NotificationKind,
    pub subject: String,
    pub target_name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    pub sent_at: DateTime<Utc>,
}

impl Notification {
    pub fn change(
        recipient: &str,
        target: &MonitoredTarget,
        summary: &str,
        at: DateTime<Utc>,
    ) -> Self {
        let target_name = target.display_name();
        Self {
            recipient: recipient.to_string(),
            kind: NotificationKind::Change,
            subject: format!("Content changed: {}", target_name),
            target_name,
            url: target.url.clone(),
            summary: Some(summary.to_string()),
            interval_secs: None,
            sent_at: at,
        }
    }

    pub fn confirmation(recipient: &str, target: &MonitoredTarget, at: DateTime<Utc>) -> Self {
        Self {
            recipient: recipient.to_string(),
            kind: NotificationKind::Confirmation,
            subject: "Reminder subscription confirmed".to_string(),
            target_name: target.display_name(),
            url: target.url.clone(),
            summary: None,
            interval_secs: Some(target.interval_secs),
            sent_at: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> MonitoredTarget {
        let now = Utc::now();
        MonitoredTarget {
            id: "t1".into(),
            owner: Owner::Email {
                email: "a@example.com".into(),
            },
            name: None,
            url: "https://example.com/page".into(),
            selector: None,
            xpath: Some("//main".into()),
            interval_secs: 3600,
            max_pages: 1,
            is_active: true,
            last_fingerprint: None,
            last_snapshot: None,
            last_checked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_owner_parts_roundtrip() {
        let owner = Owner::Agent {
            agent_id: "agent-7".into(),
        };
        let back = Owner::from_parts(owner.kind(), owner.reference()).unwrap();
        assert_eq!(back, owner);
        assert!(Owner::from_parts("team", "x").is_none());
    }

    #[test]
    fn test_update_apply_only_touches_set_fields() {
        let mut t = target();
        let update = TargetUpdate {
            interval_secs: Some(7200),
            xpath: Some(None),
            ..Default::default()
        };
        update.apply(&mut t, Utc::now());
        assert_eq!(t.interval_secs, 7200);
        assert_eq!(t.xpath, None);
        assert_eq!(t.url, "https://example.com/page");
        assert!(t.is_active);
    }

    #[test]
    fn test_update_null_clears_absent_keeps() {
        let update: TargetUpdate =
            serde_json::from_str(r#"{"selector": null, "interval_secs": 60}"#).unwrap();
        assert_eq!(update.selector, Some(None));
        assert_eq!(update.xpath, None);
        assert_eq!(update.interval_secs, Some(60));
    }

    #[test]
    fn test_empty_update() {
        assert!(TargetUpdate::default().is_empty());
        let update = TargetUpdate {
            is_active: Some(false),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }

    #[test]
    fn test_display_name_for_reminder() {
        assert_eq!(target().display_name(), "Reminder: https://example.com/page");
    }

    #[test]
    fn test_check_status_serializes_snake_case() {
        let json = serde_json::to_string(&CheckStatus::NoContent).unwrap();
        assert_eq!(json, "\"no_content\"");
    }
}
