//! In-process recurring job scheduler.
//!
//! One job per monitored target, keyed `scrape_<target_id>`. The
//! scheduler never sleeps per job: a loop calls [`Scheduler::tick`] every
//! `tick_secs`, and each tick fires every job whose `next_fire_time` has
//! passed.
//!
//! ```text
//!  schedule ──▶ scheduled ──tick (due)──▶ firing ──done──▶ scheduled
//!                  │                         │
//!                  └──── cancel ◀────────────┘ (in-flight run finishes,
//!                                               no reschedule)
//! ```
//!
//! # Guarantees
//!
//! - A job never runs concurrently with itself: a due job that is still in
//!   flight is skipped until its run completes.
//! - `schedule` on an existing key replaces the job. Each job carries a
//!   generation number; a run that finishes after its job was replaced or
//!   cancelled leaves the new state alone.
//! - A run that fails (or panics) is rescheduled like any other.
//!
//! Time comes from an injected [`Clock`], so tests drive the state
//! machine with a manual clock and explicit `tick()` calls.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sitewatch_core::models::{CheckResult, CheckStatus, ScheduledJob};

// ═══════════════════════════════════════════════════════════════════════
// Seams
// ═══════════════════════════════════════════════════════════════════════

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The work a job performs when it fires.
///
/// Implementations convert every failure into the returned result; the
/// scheduler only logs it.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_job(&self, target_id: &str) -> CheckResult;
}

pub fn job_key(target_id: &str) -> String {
    format!("scrape_{}", target_id)
}

// ═══════════════════════════════════════════════════════════════════════
// Job table
// ═══════════════════════════════════════════════════════════════════════

struct JobEntry {
    interval: Duration,
    next_fire: DateTime<Utc>,
    generation: u64,
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<String, JobEntry>,
    in_flight: HashSet<String>,
    next_generation: u64,
}

struct Shared {
    runner: Arc<dyn JobRunner>,
    clock: Arc<dyn Clock>,
    table: Mutex<JobTable>,
}

impl Shared {
    fn table(&self) -> std::sync::MutexGuard<'_, JobTable> {
        // A panic while holding the lock leaves the table consistent: every
        // mutation is a single insert or remove.
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn after(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Clears the in-flight mark and reschedules when a fire ends, including
/// when the runner panics.
struct FireGuard {
    shared: Arc<Shared>,
    target_id: String,
    generation: u64,
}

impl Drop for FireGuard {
    fn drop(&mut self) {
        let now = self.shared.clock.now();
        let mut table = self.shared.table();
        table.in_flight.remove(&self.target_id);
        if let Some(entry) = table.jobs.get_mut(&self.target_id) {
            if entry.generation == self.generation {
                entry.next_fire = after(now, entry.interval);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Scheduler
// ═══════════════════════════════════════════════════════════════════════

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    shared: Arc<Shared>,
    tick_every: Duration,
    worker: tokio::sync::Mutex<Option<Worker>>,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn JobRunner>, clock: Arc<dyn Clock>, tick_every: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                runner,
                clock,
                table: Mutex::new(JobTable::default()),
            }),
            tick_every,
            worker: tokio::sync::Mutex::new(None),
        }
    }

    /// Create or replace the job for `target_id`; it first fires one
    /// interval from now.
    pub fn schedule(&self, target_id: &str, interval: Duration) {
        let now = self.shared.clock.now();
        let mut table = self.shared.table();
        table.next_generation += 1;
        let generation = table.next_generation;
        let replaced = table
            .jobs
            .insert(
                target_id.to_string(),
                JobEntry {
                    interval,
                    next_fire: after(now, interval),
                    generation,
                },
            )
            .is_some();
        tracing::debug!(
            target_id,
            interval_secs = interval.as_secs(),
            replaced,
            "job scheduled"
        );
    }

    /// Remove the job. Returns false if there was none.
    pub fn cancel(&self, target_id: &str) -> bool {
        let removed = self.shared.table().jobs.remove(target_id).is_some();
        if removed {
            tracing::debug!(target_id, "job cancelled");
        }
        removed
    }

    pub fn is_scheduled(&self, target_id: &str) -> bool {
        self.shared.table().jobs.contains_key(target_id)
    }

    /// Snapshot of every job, soonest first.
    pub fn list(&self) -> Vec<ScheduledJob> {
        let table = self.shared.table();
        let mut jobs: Vec<ScheduledJob> = table
            .jobs
            .iter()
            .map(|(target_id, entry)| ScheduledJob {
                job_key: job_key(target_id),
                target_id: target_id.clone(),
                interval_secs: entry.interval.as_secs(),
                next_fire_time: entry.next_fire,
                running: table.in_flight.contains(target_id),
            })
            .collect();
        jobs.sort_by(|a, b| {
            a.next_fire_time
                .cmp(&b.next_fire_time)
                .then(a.target_id.cmp(&b.target_id))
        });
        jobs
    }

    /// Fire every due job that is not already running, each on its own
    /// task. Returns the handles of the fires started by this tick.
    pub fn tick(&self) -> Vec<JoinHandle<()>> {
        tick(&self.shared)
    }

    /// Start the background loop. Calling `start` twice is a no-op.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let token = cancel.clone();
        let every = self.tick_every;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut running: Vec<JoinHandle<()>> = Vec::new();

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        running.retain(|h| !h.is_finished());
                        running.extend(tick(&shared));
                    }
                }
            }

            // Cooperative shutdown: fires already started run to completion.
            for handle in running {
                let _ = handle.await;
            }
            tracing::info!("scheduler stopped");
        });

        tracing::info!(tick_secs = every.as_secs(), "scheduler started");
        *worker = Some(Worker { cancel, handle });
    }

    /// Stop the loop and wait for in-flight fires. Jobs stay registered.
    pub async fn stop(&self) {
        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if let Err(e) = worker.handle.await {
                tracing::error!(error = %e, "scheduler loop panicked");
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.worker.lock().await.is_some()
    }
}

fn tick(shared: &Arc<Shared>) -> Vec<JoinHandle<()>> {
    let now = shared.clock.now();
    let due: Vec<(String, u64)> = {
        let mut table = shared.table();
        let due: Vec<(String, u64)> = table
            .jobs
            .iter()
            .filter(|(id, entry)| entry.next_fire <= now && !table.in_flight.contains(*id))
            .map(|(id, entry)| (id.clone(), entry.generation))
            .collect();
        for (id, _) in &due {
            table.in_flight.insert(id.clone());
        }
        due
    };

    due.into_iter()
        .map(|(target_id, generation)| {
            let guard = FireGuard {
                shared: Arc::clone(shared),
                target_id,
                generation,
            };
            let runner = Arc::clone(&shared.runner);
            tokio::spawn(async move {
                let result = runner.run_job(&guard.target_id).await;
                match result.status {
                    CheckStatus::Error => tracing::warn!(
                        target_id = %guard.target_id,
                        error_kind = result.error_kind.as_deref().unwrap_or(""),
                        error = result.error.as_deref().unwrap_or(""),
                        "scheduled check failed"
                    ),
                    status => {
                        tracing::info!(target_id = %guard.target_id, %status, "scheduled check finished")
                    }
                }
                drop(guard);
            })
        })
        .collect()
}
