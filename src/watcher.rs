//! Composition root and public operation surface.
//!
//! [`Watcher`] owns the record store, the retrieval index, the monitor
//! and the scheduler, and exposes the operations the CLI and the HTTP
//! server call:
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`create_target`](Watcher::create_target) | validate, store, baseline check, schedule |
//! | [`update_target`](Watcher::update_target) | validate, store, reschedule or cancel |
//! | [`delete_target`](Watcher::delete_target) | cancel job, purge index, delete records |
//! | [`trigger_now`](Watcher::trigger_now) | out-of-band check; the schedule is untouched |
//! | [`ask`](Watcher::ask) | grounded answer from the target's index |
//! | [`list_scheduled_jobs`](Watcher::list_scheduled_jobs) | scheduler snapshot |
//!
//! Unknown ids yield `Ok(None)` (or `Ok(false)`); validation problems are
//! [`WatchError::Validation`]; index and storage faults are returned as-is.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use uuid::Uuid;

use sitewatch_core::answer::{answer_question, AnswerOptions};
use sitewatch_core::embedding::EmbeddingProvider;
use sitewatch_core::index::RetrievalIndex;
use sitewatch_core::models::{
    Answer, ChangeRecord, CheckResult, IndexStats, MonitoredTarget, NewTarget, Notification,
    Owner, ScheduledJob, Subscription, TargetUpdate,
};
use sitewatch_core::store::{ChunkStore, RecordStore};
use sitewatch_core::traits::{CompletionProvider, Notifier, PageFetcher};
use sitewatch_core::{Result, WatchError};

use crate::completion::create_completion;
use crate::config::Config;
use crate::embedding::create_provider;
use crate::fetch::HttpFetcher;
use crate::monitor::{Monitor, MonitorOptions};
use crate::notify::create_notifier;
use crate::scheduler::{Clock, Scheduler, SystemClock};
use crate::sqlite_store::SqliteStore;
use crate::validate::{validate_email, validate_new_target, validate_update, Limits};

/// A new target together with the outcome of its baseline check.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CreatedTarget {
    pub target: MonitoredTarget,
    pub baseline: CheckResult,
}

/// Everything a [`Watcher`] is assembled from.
pub struct Components {
    pub records: Arc<dyn RecordStore>,
    pub chunks: Arc<dyn ChunkStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub completion: Arc<dyn CompletionProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub chunking: sitewatch_core::chunk::ChunkOptions,
    pub embed_batch_size: usize,
    pub retain_sessions: Option<usize>,
    pub answer: AnswerOptions,
    pub monitor: MonitorOptions,
    pub limits: Limits,
    pub tick: Duration,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            chunking: sitewatch_core::chunk::ChunkOptions::default(),
            embed_batch_size: 64,
            retain_sessions: None,
            answer: AnswerOptions::default(),
            monitor: MonitorOptions::default(),
            limits: Limits::default(),
            tick: Duration::from_secs(30),
        }
    }
}

impl WatcherOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: config.chunking.options(),
            embed_batch_size: config.embedding.batch_size,
            retain_sessions: config.retrieval.retain_sessions,
            answer: config.answer_options(),
            monitor: MonitorOptions {
                summary: config.monitor.summary_options(),
                preview_chars: config.monitor.preview_chars,
                max_pages_cap: config.fetch.max_pages_cap,
                settle: Duration::from_millis(config.fetch.settle_millis),
            },
            limits: Limits {
                min_interval_secs: config.scheduler.min_interval_secs,
                max_interval_secs: config.scheduler.max_interval_secs,
                max_pages_cap: config.fetch.max_pages_cap,
            },
            tick: Duration::from_secs(config.scheduler.tick_secs),
        }
    }
}

pub struct Watcher {
    records: Arc<dyn RecordStore>,
    index: Arc<RetrievalIndex>,
    monitor: Arc<Monitor>,
    scheduler: Scheduler,
    completion: Arc<dyn CompletionProvider>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    options: WatcherOptions,
}

impl Watcher {
    pub fn new(components: Components, options: WatcherOptions) -> Self {
        let index = Arc::new(
            RetrievalIndex::new(components.chunks, components.embedder, options.chunking)
                .with_batch_size(options.embed_batch_size)
                .with_retention(options.retain_sessions),
        );
        let monitor = Arc::new(Monitor::new(
            components.records.clone(),
            index.clone(),
            components.fetcher,
            components.completion.clone(),
            components.notifier.clone(),
            components.clock.clone(),
            options.monitor.clone(),
        ));
        let scheduler = Scheduler::new(monitor.clone(), components.clock.clone(), options.tick);

        Self {
            records: components.records,
            index,
            monitor,
            scheduler,
            completion: components.completion,
            notifier: components.notifier,
            clock: components.clock,
            options,
        }
    }

    /// Build the production stack: SQLite, HTTP fetcher and the configured
    /// embedding, completion and notify providers.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = crate::db::connect(config).await?;
        crate::migrate::apply_schema(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool));

        let components = Components {
            records: store.clone(),
            chunks: store,
            embedder: create_provider(&config.embedding)
                .context("Failed to create embedding provider")?,
            fetcher: Arc::new(HttpFetcher::new(&config.fetch)?),
            completion: create_completion(&config.completion)
                .context("Failed to create completion provider")?,
            notifier: create_notifier(&config.notify)
                .context("Failed to create notifier")?,
            clock: Arc::new(SystemClock),
        };
        Ok(Self::new(components, WatcherOptions::from_config(config)))
    }

    // ============ Lifecycle ============

    /// Schedule every active target and start the scheduler loop.
    /// Returns the number of jobs registered.
    pub async fn start(&self) -> Result<usize> {
        let targets = self.records.list_targets(true).await?;
        for target in &targets {
            self.scheduler.schedule(&target.id, target.interval());
        }
        self.scheduler.start().await;
        tracing::info!(jobs = targets.len(), "watcher started");
        Ok(targets.len())
    }

    pub async fn stop(&self) {
        self.scheduler.stop().await;
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // ============ Targets ============

    /// Create a target, run its baseline check and register its job.
    ///
    /// A failed baseline is reported in the result; the target is still
    /// scheduled and the next fire retries it.
    pub async fn create_target(&self, new: NewTarget) -> Result<CreatedTarget> {
        validate_new_target(&new, &self.options.limits)?;

        let now = self.clock.now();
        let target = MonitoredTarget {
            id: Uuid::new_v4().to_string(),
            owner: new.owner,
            name: new.name,
            url: new.url.trim().to_string(),
            selector: new.selector,
            xpath: new.xpath,
            interval_secs: new.interval_secs,
            max_pages: new.max_pages,
            is_active: true,
            last_fingerprint: None,
            last_snapshot: None,
            last_checked_at: None,
            created_at: now,
            updated_at: now,
        };
        self.records.insert_target(&target).await?;
        tracing::info!(target_id = %target.id, url = %target.url, interval_secs = target.interval_secs, "target created");

        if let Owner::Email { email } = &target.owner {
            self.add_subscription(&target.id, email).await?;
            let confirmation = Notification::confirmation(email, &target, now);
            if let Err(e) = self.notifier.notify(&confirmation).await {
                tracing::warn!(target_id = %target.id, recipient = %email, error = %e, "confirmation notification failed");
            }
        }

        let baseline = self.monitor.check_target(&target).await;
        self.scheduler.schedule(&target.id, target.interval());

        let target = self
            .records
            .get_target(&target.id)
            .await?
            .ok_or_else(|| WatchError::storage("target vanished after creation"))?;
        Ok(CreatedTarget { target, baseline })
    }

    pub async fn get_target(&self, id: &str) -> Result<Option<MonitoredTarget>> {
        self.records.get_target(id).await
    }

    pub async fn list_targets(&self, active_only: bool) -> Result<Vec<MonitoredTarget>> {
        self.records.list_targets(active_only).await
    }

    /// Apply `update`. An interval change or reactivation reschedules the
    /// job; deactivation cancels it.
    pub async fn update_target(
        &self,
        id: &str,
        update: &TargetUpdate,
    ) -> Result<Option<MonitoredTarget>> {
        validate_update(update, &self.options.limits)?;

        let Some(before) = self.records.get_target(id).await? else {
            return Ok(None);
        };
        if update.is_empty() {
            return Ok(Some(before));
        }

        let Some(after) = self
            .records
            .update_target(id, update, self.clock.now())
            .await?
        else {
            return Ok(None);
        };

        if !after.is_active {
            self.scheduler.cancel(id);
        } else if !before.is_active
            || before.interval_secs != after.interval_secs
            || !self.scheduler.is_scheduled(id)
        {
            self.scheduler.schedule(id, after.interval());
        }

        tracing::info!(target_id = id, active = after.is_active, interval_secs = after.interval_secs, "target updated");
        Ok(Some(after))
    }

    /// Cancel the job, purge the index and delete the target's records.
    /// Waits for a check of the target already in progress to finish
    /// first. Returns false for an unknown id.
    pub async fn delete_target(&self, id: &str) -> Result<bool> {
        self.scheduler.cancel(id);
        let _guard = self.monitor.lock_target(id).await;
        let chunks = self.index.purge(id).await?;
        let removed = self.records.delete_target(id).await?;
        self.monitor.forget_target(id);
        if removed {
            tracing::info!(target_id = id, chunks, "target deleted");
        }
        Ok(removed)
    }

    // ============ Checks and answers ============

    /// Check now, outside the schedule. `None` for an unknown id.
    pub async fn trigger_now(&self, id: &str) -> Result<Option<CheckResult>> {
        self.monitor.check(id).await
    }

    /// Answer `question` from the target's index. `None` for an unknown id.
    pub async fn ask(&self, id: &str, question: &str) -> Result<Option<Answer>> {
        let question = question.trim();
        if question.is_empty() {
            return Err(WatchError::validation("question must not be empty"));
        }
        let Some(target) = self.records.get_target(id).await? else {
            return Ok(None);
        };
        let answer = answer_question(
            &self.index,
            self.completion.as_ref(),
            &target.id,
            &target.url,
            question,
            &self.options.answer,
        )
        .await?;
        Ok(Some(answer))
    }

    pub fn list_scheduled_jobs(&self) -> Vec<ScheduledJob> {
        self.scheduler.list()
    }

    pub async fn history(&self, id: &str, limit: usize) -> Result<Vec<ChangeRecord>> {
        self.records.list_changes(id, limit).await
    }

    /// Index statistics. An unknown or purged target reports zero chunks.
    pub async fn stats(&self, id: &str) -> Result<IndexStats> {
        self.index.stats(id).await
    }

    // ============ Subscriptions ============

    /// Subscribe `email` to change notifications. Re-subscribing an
    /// existing address reactivates it. `None` for an unknown target.
    pub async fn subscribe(&self, target_id: &str, email: &str) -> Result<Option<Subscription>> {
        validate_email(email)?;
        if self.records.get_target(target_id).await?.is_none() {
            return Ok(None);
        }
        self.add_subscription(target_id, email).await.map(Some)
    }

    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<bool> {
        self.records
            .set_subscription_active(subscription_id, false)
            .await
    }

    pub async fn list_subscribers(&self, target_id: &str) -> Result<Vec<Subscription>> {
        self.records.list_subscriptions(target_id).await
    }

    async fn add_subscription(&self, target_id: &str, email: &str) -> Result<Subscription> {
        let existing = self.records.list_subscriptions(target_id).await?;
        if let Some(mut sub) = existing
            .into_iter()
            .find(|s| s.email.eq_ignore_ascii_case(email))
        {
            if !sub.is_active {
                self.records.set_subscription_active(&sub.id, true).await?;
                sub.is_active = true;
            }
            return Ok(sub);
        }

        let sub = Subscription {
            id: Uuid::new_v4().to_string(),
            target_id: target_id.to_string(),
            email: email.to_string(),
            is_active: true,
            created_at: self.clock.now(),
        };
        self.records.add_subscription(&sub).await?;
        tracing::debug!(target_id, email, "subscription added");
        Ok(sub)
    }
}
