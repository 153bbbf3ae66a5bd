//! The fetch → extract → detect → react pipeline for one target.
//!
//! ```text
//! fetch/crawl ─▶ extract (blocking pool) ─▶ classify against last fingerprint
//!
//!   baseline   index session, store fingerprint + snapshot
//!   unchanged  store fingerprint + snapshot + timestamp
//!   changed    summarize(stored snapshot, new) ─▶ index session ─▶ change record
//!              ─▶ store fingerprint + snapshot ─▶ notify each active subscriber
//!   no_content timestamp only; the last good fingerprint is kept
//! ```
//!
//! Checks of one target run under a per-target lock and re-read the
//! target once they hold it; [`Monitor::lock_target`] lets deletion take
//! the same lock, so a check never writes for a target that is gone.
//!
//! With embeddings disabled the index step is skipped and everything
//! else runs.
//!
//! [`Monitor::check_target`] never fails: every error becomes a
//! [`CheckResult`] with status `error` and the error kind. Index and
//! storage faults are additionally logged at `error` level.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex as TargetLock, OwnedMutexGuard};
use uuid::Uuid;

use sitewatch_core::detect::{classify, Detection};
use sitewatch_core::extract::extract_text;
use sitewatch_core::index::{RetrievalIndex, SessionMeta};
use sitewatch_core::models::{
    ChangeRecord, CheckResult, CheckStatus, MonitoredTarget, Notification,
};
use sitewatch_core::store::RecordStore;
use sitewatch_core::summarize::{summarize_change, SummaryOptions};
use sitewatch_core::text::truncate_chars;
use sitewatch_core::traits::{CompletionProvider, Notifier, PageFetcher};
use sitewatch_core::{Result, WatchError};

use crate::crawl::{crawl, CrawlOptions};
use crate::scheduler::{Clock, JobRunner};

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub summary: SummaryOptions,
    /// Chars of old/new text kept on a change record.
    pub preview_chars: usize,
    pub max_pages_cap: u32,
    pub settle: Duration,
}

impl MonitorOptions {
    /// Chars of extracted text kept on the target between checks: enough
    /// for both the summary prompt and a change preview.
    pub fn snapshot_chars(&self) -> usize {
        self.summary.input_chars.max(self.preview_chars)
    }
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            summary: SummaryOptions::default(),
            preview_chars: 500,
            max_pages_cap: 20,
            settle: Duration::ZERO,
        }
    }
}

pub struct Monitor {
    records: Arc<dyn RecordStore>,
    index: Arc<RetrievalIndex>,
    fetcher: Arc<dyn PageFetcher>,
    completion: Arc<dyn CompletionProvider>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    options: MonitorOptions,
    locks: Mutex<HashMap<String, Arc<TargetLock<()>>>>,
}

impl Monitor {
    pub fn new(
        records: Arc<dyn RecordStore>,
        index: Arc<RetrievalIndex>,
        fetcher: Arc<dyn PageFetcher>,
        completion: Arc<dyn CompletionProvider>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        options: MonitorOptions,
    ) -> Self {
        Self {
            records,
            index,
            fetcher,
            completion,
            notifier,
            clock,
            options,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Exclusive access to `target_id` until the guard drops.
    pub async fn lock_target(&self, target_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(target_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry of a deleted target.
    pub fn forget_target(&self, target_id: &str) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target_id);
    }

    /// Check the target with id `target_id`. `None` if it does not exist.
    pub async fn check(&self, target_id: &str) -> Result<Option<CheckResult>> {
        let _guard = self.lock_target(target_id).await;
        match self.records.get_target(target_id).await? {
            Some(target) => Ok(Some(self.run(&target).await)),
            None => Ok(None),
        }
    }

    /// Check `target` as currently stored. A target deleted in the
    /// meantime yields `skipped`; errors are folded into the result.
    pub async fn check_target(&self, target: &MonitoredTarget) -> CheckResult {
        match self.check(&target.id).await {
            Ok(Some(result)) => result,
            Ok(None) => {
                tracing::debug!(target_id = %target.id, "target deleted before check");
                CheckResult::new(&target.id, CheckStatus::Skipped, self.clock.now())
            }
            Err(e) => {
                tracing::error!(target_id = %target.id, error = %e, "could not load target");
                CheckResult::failed(&target.id, &e, self.clock.now())
            }
        }
    }

    async fn run(&self, target: &MonitoredTarget) -> CheckResult {
        match self.run_check(target).await {
            Ok(result) => {
                tracing::info!(target_id = %target.id, url = %target.url, status = %result.status, "check finished");
                result
            }
            Err(e) => {
                if e.is_systemic() {
                    tracing::error!(target_id = %target.id, url = %target.url, error = %e, "check failed");
                } else {
                    tracing::warn!(target_id = %target.id, url = %target.url, error = %e, "check failed");
                }
                CheckResult::failed(&target.id, &e, self.clock.now())
            }
        }
    }

    async fn run_check(&self, target: &MonitoredTarget) -> Result<CheckResult> {
        let text = self.load_text(target).await?;
        let checked_at = self.clock.now();

        let detection = classify(target.last_fingerprint.as_deref(), &text);
        let snapshot = truncate_chars(&text, self.options.snapshot_chars());
        let mut result = CheckResult::new(&target.id, detection.status(), checked_at);
        result.fingerprint = detection.fingerprint().map(str::to_string);

        match &detection {
            Detection::NoContent => {
                tracing::warn!(target_id = %target.id, url = %target.url, "no content extracted, keeping previous fingerprint");
                self.records
                    .record_check(&target.id, None, None, checked_at)
                    .await?;
                result.fingerprint = target.last_fingerprint.clone();
            }
            Detection::Baseline { fingerprint } => {
                self.index_session(target, &text, checked_at).await?;
                self.records
                    .record_check(&target.id, Some(fingerprint.as_str()), Some(snapshot), checked_at)
                    .await?;
            }
            Detection::Unchanged { fingerprint } => {
                self.records
                    .record_check(&target.id, Some(fingerprint.as_str()), Some(snapshot), checked_at)
                    .await?;
            }
            Detection::Changed { fingerprint, .. } => {
                let old_text = target.last_snapshot.clone().unwrap_or_default();
                let summary =
                    summarize_change(self.completion.as_ref(), &old_text, &text, &self.options.summary)
                        .await;

                self.index_session(target, &text, checked_at).await?;

                let record = ChangeRecord {
                    id: Uuid::new_v4().to_string(),
                    target_id: target.id.clone(),
                    old_preview: truncate_chars(&old_text, self.options.preview_chars).to_string(),
                    new_preview: truncate_chars(&text, self.options.preview_chars).to_string(),
                    summary: summary.clone(),
                    detected_at: checked_at,
                };
                self.records.insert_change(&record).await?;
                self.records
                    .record_check(&target.id, Some(fingerprint.as_str()), Some(snapshot), checked_at)
                    .await?;

                self.notify_subscribers(target, &summary).await;
                result.summary = Some(summary);
            }
        }

        Ok(result)
    }

    /// Extracted text for the target: the page alone, or a crawl when
    /// `max_pages > 1`.
    async fn load_text(&self, target: &MonitoredTarget) -> Result<String> {
        if target.max_pages > 1 {
            let opts = CrawlOptions {
                max_pages: target.max_pages.min(self.options.max_pages_cap) as usize,
                settle: self.options.settle,
            };
            return crawl(
                self.fetcher.as_ref(),
                &target.url,
                target.selector.as_deref(),
                target.xpath.as_deref(),
                &opts,
            )
            .await;
        }

        let html = self.fetcher.fetch(&target.url).await?;
        let selector = target.selector.clone();
        let xpath = target.xpath.clone();
        tokio::task::spawn_blocking(move || extract_text(&html, selector.as_deref(), xpath.as_deref()))
            .await
            .map_err(|e| WatchError::fetch(format!("extraction task failed: {}", e)))
    }

    async fn index_session(
        &self,
        target: &MonitoredTarget,
        text: &str,
        scraped_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        if !self.index.is_enabled() {
            tracing::warn!(target_id = %target.id, "embeddings disabled, content not indexed");
            return Ok(());
        }
        let selector_used = target.selector_used();
        let summary = self
            .index
            .upsert(
                &target.id,
                text,
                &SessionMeta {
                    source_url: &target.url,
                    selector_used: selector_used.as_deref(),
                    scraped_at,
                },
            )
            .await?;
        tracing::debug!(target_id = %target.id, chunks = summary.chunks, retired = summary.retired, "index updated");
        Ok(())
    }

    /// Fan out a change notification. Delivery failures are logged per
    /// recipient and never stop the others.
    async fn notify_subscribers(&self, target: &MonitoredTarget, summary: &str) {
        let subscriptions = match self.records.list_subscriptions(&target.id).await {
            Ok(subs) => subs,
            Err(e) => {
                tracing::error!(target_id = %target.id, error = %e, "could not load subscribers");
                return;
            }
        };

        let now = self.clock.now();
        for sub in subscriptions.iter().filter(|s| s.is_active) {
            let notification = Notification::change(&sub.email, target, summary, now);
            if let Err(e) = self.notifier.notify(&notification).await {
                tracing::warn!(target_id = %target.id, recipient = %sub.email, error = %e, "change notification failed");
            }
        }
    }
}

#[async_trait]
impl JobRunner for Monitor {
    /// Scheduled fire: skips targets that vanished or were deactivated
    /// since the job was registered.
    async fn run_job(&self, target_id: &str) -> CheckResult {
        let _guard = self.lock_target(target_id).await;
        let now = self.clock.now();
        match self.records.get_target(target_id).await {
            Ok(Some(target)) if target.is_active => self.run(&target).await,
            Ok(_) => {
                tracing::debug!(target_id, "skipping missing or inactive target");
                CheckResult::new(target_id, CheckStatus::Skipped, now)
            }
            Err(e) => {
                tracing::error!(target_id, error = %e, "could not load target");
                CheckResult::failed(target_id, &e, now)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::embedding::DisabledProvider;
    use crate::testing::{KeywordEmbedder, ManualClock, MockCompletion, MockFetcher, RecordingNotifier};
    use sitewatch_core::chunk::ChunkOptions;
    use sitewatch_core::embedding::EmbeddingProvider;
    use sitewatch_core::models::{Owner, Subscription};
    use sitewatch_core::store::memory::InMemoryStore;
    use sitewatch_core::summarize::FALLBACK_SUMMARY;

    const URL: &str = "https://example.com/page";

    struct Harness {
        store: Arc<InMemoryStore>,
        fetcher: Arc<MockFetcher>,
        completion: Arc<MockCompletion>,
        notifier: Arc<RecordingNotifier>,
        index: Arc<RetrievalIndex>,
        monitor: Monitor,
    }

    fn harness(completion: MockCompletion) -> Harness {
        harness_with(completion, Arc::new(KeywordEmbedder::default()))
    }

    fn harness_with(completion: MockCompletion, embedder: Arc<dyn EmbeddingProvider>) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let fetcher = Arc::new(MockFetcher::new());
        let completion = Arc::new(completion);
        let notifier = Arc::new(RecordingNotifier::new());
        let index = Arc::new(RetrievalIndex::new(
            store.clone(),
            embedder,
            ChunkOptions::default(),
        ));
        let monitor = Monitor::new(
            store.clone(),
            index.clone(),
            fetcher.clone(),
            completion.clone(),
            notifier.clone(),
            Arc::new(ManualClock::default()),
            MonitorOptions::default(),
        );
        Harness {
            store,
            fetcher,
            completion,
            notifier,
            index,
            monitor,
        }
    }

    async fn add_target(store: &InMemoryStore, max_pages: u32) -> MonitoredTarget {
        let now = Utc::now();
        let target = MonitoredTarget {
            id: "t1".into(),
            owner: Owner::Agent {
                agent_id: "agent-1".into(),
            },
            name: Some("Pricing".into()),
            url: URL.into(),
            selector: None,
            xpath: None,
            interval_secs: 3600,
            max_pages,
            is_active: true,
            last_fingerprint: None,
            last_snapshot: None,
            last_checked_at: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_target(&target).await.unwrap();
        target
    }

    async fn subscribe(store: &InMemoryStore, email: &str, active: bool) {
        store
            .add_subscription(&Subscription {
                id: Uuid::new_v4().to_string(),
                target_id: "t1".into(),
                email: email.into(),
                is_active: active,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    fn html(body: &str) -> String {
        format!("<html><body><main><p>{}</p></main></body></html>", body)
    }

    fn content(tag: &str) -> String {
        format!("{} plan costs twenty dollars per month and includes support. ", tag).repeat(6)
    }

    async fn run(h: &Harness) -> CheckResult {
        h.monitor.check("t1").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_baseline_then_unchanged_then_changed() {
        let h = harness(MockCompletion::replying("The price went up."));
        add_target(&h.store, 1).await;
        subscribe(&h.store, "a@example.com", true).await;
        subscribe(&h.store, "b@example.com", false).await;

        h.fetcher.push_page(URL, &html(&content("Basic")));
        h.fetcher.push_page(URL, &html(&content("Basic")));
        h.fetcher.push_page(URL, &html(&content("Premium")));

        let first = run(&h).await;
        assert_eq!(first.status, CheckStatus::Baseline);
        let h0 = first.fingerprint.clone().unwrap();
        assert!(h.store.list_changes("t1", 10).await.unwrap().is_empty());
        assert!(h.notifier.sent().is_empty());

        let second = run(&h).await;
        assert_eq!(second.status, CheckStatus::Unchanged);
        let stored = h.store.get_target("t1").await.unwrap().unwrap();
        assert_eq!(stored.last_fingerprint.as_deref(), Some(h0.as_str()));

        let third = run(&h).await;
        assert_eq!(third.status, CheckStatus::Changed);
        assert_eq!(third.summary.as_deref(), Some("The price went up."));
        assert_ne!(third.fingerprint.as_deref(), Some(h0.as_str()));

        let changes = h.store.list_changes("t1", 10).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].new_preview.starts_with("Premium"));
        assert!(changes[0].old_preview.starts_with("Basic"));
        assert!(changes[0].new_preview.chars().count() <= 500);

        assert_eq!(h.index.stats("t1").await.unwrap().sessions, 2);

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "a@example.com");
        assert_eq!(sent[0].subject, "Content changed: Pricing");
    }

    #[tokio::test]
    async fn test_summary_failure_uses_fallback_and_still_records() {
        let h = harness(MockCompletion::failing("model overloaded"));
        add_target(&h.store, 1).await;
        h.fetcher.push_page(URL, &html(&content("Basic")));
        h.fetcher.push_page(URL, &html(&content("Premium")));

        run(&h).await;
        let changed = run(&h).await;
        assert_eq!(changed.status, CheckStatus::Changed);
        assert_eq!(changed.summary.as_deref(), Some(FALLBACK_SUMMARY));
        assert_eq!(h.store.list_changes("t1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_block_others() {
        let h = harness(MockCompletion::replying("Updated."));
        add_target(&h.store, 1).await;
        subscribe(&h.store, "broken@example.com", true).await;
        subscribe(&h.store, "ok@example.com", true).await;
        h.notifier.fail_for("broken@example.com");

        h.fetcher.push_page(URL, &html(&content("Basic")));
        h.fetcher.push_page(URL, &html(&content("Premium")));
        run(&h).await;
        let changed = run(&h).await;

        assert_eq!(changed.status, CheckStatus::Changed);
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "ok@example.com");
    }

    #[tokio::test]
    async fn test_no_content_keeps_fingerprint() {
        let h = harness(MockCompletion::replying("x"));
        add_target(&h.store, 1).await;
        h.fetcher.push_page(URL, &html(&content("Basic")));
        h.fetcher.push_page(URL, "<html><body><script>var a = 1;</script></body></html>");

        let baseline = run(&h).await;
        let empty = run(&h).await;
        assert_eq!(empty.status, CheckStatus::NoContent);

        let stored = h.store.get_target("t1").await.unwrap().unwrap();
        assert_eq!(stored.last_fingerprint, baseline.fingerprint);
        assert!(h.completion.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_error_becomes_result() {
        let h = harness(MockCompletion::replying("x"));
        add_target(&h.store, 1).await;
        h.fetcher.push_failure(URL, "HTTP 503 for https://example.com/page");

        let result = run(&h).await;
        assert_eq!(result.status, CheckStatus::Error);
        assert_eq!(result.error_kind.as_deref(), Some("fetch_error"));
        let stored = h.store.get_target("t1").await.unwrap().unwrap();
        assert_eq!(stored.last_fingerprint, None);
    }

    #[tokio::test]
    async fn test_unknown_target_is_none() {
        let h = harness(MockCompletion::replying("x"));
        assert!(h.monitor.check("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scheduled_run_skips_inactive_target() {
        let h = harness(MockCompletion::replying("x"));
        let mut target = add_target(&h.store, 1).await;
        target.is_active = false;
        h.store.insert_target(&target).await.unwrap();

        let result = h.monitor.run_job("t1").await;
        assert_eq!(result.status, CheckStatus::Skipped);
        assert!(h.fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_multi_page_target_crawls() {
        let h = harness(MockCompletion::replying("x"));
        add_target(&h.store, 3).await;
        h.fetcher.set_page(
            URL,
            &format!(
                "<html><head><title>Page</title></head><body><main><p>{}</p><a href=\"/faq\">FAQ</a></main></body></html>",
                content("Basic")
            ),
        );
        h.fetcher.set_page(
            "https://example.com/faq",
            &format!(
                "<html><head><title>FAQ</title></head><body><main><p>{}</p></main></body></html>",
                content("Questions")
            ),
        );

        let result = run(&h).await;
        assert_eq!(result.status, CheckStatus::Baseline);
        assert_eq!(h.fetcher.calls().len(), 2);
        let stored = h.store.get_target("t1").await.unwrap().unwrap();
        assert!(stored.last_snapshot.unwrap().contains("Questions plan"));
    }

    #[tokio::test]
    async fn test_disabled_embeddings_still_detect_changes() {
        let h = harness_with(MockCompletion::replying("Price changed."), Arc::new(DisabledProvider));
        add_target(&h.store, 1).await;
        subscribe(&h.store, "a@example.com", true).await;
        h.fetcher.push_page(URL, &html(&content("Basic")));
        h.fetcher.push_page(URL, &html(&content("Premium")));

        let baseline = run(&h).await;
        assert_eq!(baseline.status, CheckStatus::Baseline);
        let stored = h.store.get_target("t1").await.unwrap().unwrap();
        assert_eq!(stored.last_fingerprint, baseline.fingerprint);

        let changed = run(&h).await;
        assert_eq!(changed.status, CheckStatus::Changed);
        assert_eq!(h.store.list_changes("t1", 10).await.unwrap().len(), 1);
        assert_eq!(h.notifier.sent().len(), 1);
        assert_eq!(h.index.stats("t1").await.unwrap().total_chunks, 0);
    }

    #[tokio::test]
    async fn test_summary_sees_previous_text_of_short_page() {
        let h = harness(MockCompletion::replying("Hours changed."));
        add_target(&h.store, 1).await;
        h.fetcher.push_page(URL, &html("Open 9-5"));
        h.fetcher.push_page(URL, &html("Open 10-6"));

        run(&h).await;
        let changed = run(&h).await;
        assert_eq!(changed.status, CheckStatus::Changed);

        let (prompt, _) = h.completion.prompts().last().cloned().unwrap();
        assert!(prompt.contains("OLD VERSION:\nOpen 9-5\n"));
        let changes = h.store.list_changes("t1", 10).await.unwrap();
        assert_eq!(changes[0].old_preview, "Open 9-5");
        assert_eq!(changes[0].new_preview, "Open 10-6");
    }

    #[tokio::test]
    async fn test_check_of_deleted_target_is_skipped() {
        let h = harness(MockCompletion::replying("x"));
        let target = add_target(&h.store, 1).await;
        h.fetcher.set_page(URL, &html(&content("Basic")));
        h.store.delete_target("t1").await.unwrap();

        let result = h.monitor.check_target(&target).await;
        assert_eq!(result.status, CheckStatus::Skipped);
        assert!(h.fetcher.calls().is_empty());
        assert_eq!(h.index.stats("t1").await.unwrap().total_chunks, 0);
    }
}
