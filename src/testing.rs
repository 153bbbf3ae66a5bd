//! Deterministic test doubles for the capability traits.
//!
//! Used by the unit tests in this crate and by the integration tests under
//! `tests/`. Nothing here touches the network or the wall clock.
//!
//! | Double | Stands in for |
//! |--------|---------------|
//! | [`MockFetcher`] | [`PageFetcher`]: fixed or queued pages per URL, call log, optional [`FetchGate`] |
//! | [`MockCompletion`] | [`CompletionProvider`]: queued replies, prompt log |
//! | [`RecordingNotifier`] | [`Notifier`]: records deliveries, can fail per recipient |
//! | [`KeywordEmbedder`] | [`EmbeddingProvider`]: hashed bag-of-words vectors |
//! | [`ManualClock`] | [`Clock`]: time moves only when told to |

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{Notify, Semaphore};

use sitewatch_core::embedding::EmbeddingProvider;
use sitewatch_core::models::Notification;
use sitewatch_core::traits::{CompletionProvider, Notifier, PageFetcher};
use sitewatch_core::{Result, WatchError};

use crate::scheduler::Clock;

// ============ Fetcher ============

/// Holds fetches of a [`MockFetcher`] until released, one permit per fetch.
pub struct FetchGate {
    entered: Notify,
    permits: Semaphore,
}

impl Default for FetchGate {
    fn default() -> Self {
        Self {
            entered: Notify::new(),
            permits: Semaphore::new(0),
        }
    }
}

impl FetchGate {
    /// Resolves once a fetch is blocked on the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let one blocked (or future) fetch through.
    pub fn release(&self) {
        self.permits.add_permits(1);
    }
}

#[derive(Default)]
pub struct MockFetcher {
    queued: Mutex<HashMap<String, VecDeque<std::result::Result<String, String>>>>,
    fixed: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<String>>,
    gate: Mutex<Option<Arc<FetchGate>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `html` for `url` whenever nothing is queued for it.
    pub fn set_page(&self, url: &str, html: &str) {
        self.fixed
            .lock()
            .unwrap()
            .insert(url.to_string(), html.to_string());
    }

    /// Serve `html` for the next fetch of `url` only.
    pub fn push_page(&self, url: &str, html: &str) {
        self.queued
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(Ok(html.to_string()));
    }

    /// Fail the next fetch of `url`.
    pub fn push_failure(&self, url: &str, message: &str) {
        self.queued
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Block every later fetch on the returned gate.
    pub fn hold(&self) -> Arc<FetchGate> {
        let gate = Arc::new(FetchGate::default());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.calls.lock().unwrap().push(url.to_string());
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            if let Ok(permit) = gate.permits.acquire().await {
                permit.forget();
            }
        }
        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|q| q.pop_front());
        match queued {
            Some(Ok(html)) => Ok(html),
            Some(Err(message)) => Err(WatchError::fetch(message)),
            None => self
                .fixed
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| WatchError::fetch(format!("HTTP 404 Not Found for {}", url))),
        }
    }
}

// ============ Completion ============

pub struct MockCompletion {
    default_reply: Mutex<std::result::Result<String, String>>,
    queued: Mutex<VecDeque<std::result::Result<String, String>>>,
    prompts: Mutex<Vec<(String, u32)>>,
}

impl MockCompletion {
    /// Replies `reply` to every prompt unless something is queued.
    pub fn replying(reply: &str) -> Self {
        Self {
            default_reply: Mutex::new(Ok(reply.to_string())),
            queued: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Fails every prompt unless something is queued.
    pub fn failing(message: &str) -> Self {
        let mock = Self::replying("");
        *mock.default_reply.lock().unwrap() = Err(message.to_string());
        mock
    }

    pub fn push_reply(&self, reply: &str) {
        self.queued
            .lock()
            .unwrap()
            .push_back(Ok(reply.to_string()));
    }

    pub fn push_failure(&self, message: &str) {
        self.queued
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    /// Every `(prompt, max_tokens)` received, in order.
    pub fn prompts(&self) -> Vec<(String, u32)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for MockCompletion {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        self.prompts
            .lock()
            .unwrap()
            .push((prompt.to_string(), max_tokens));
        let next = self.queued.lock().unwrap().pop_front();
        let reply = match next {
            Some(reply) => reply,
            None => self.default_reply.lock().unwrap().clone(),
        };
        reply.map_err(WatchError::completion)
    }
}

// ============ Notifier ============

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery to `recipient` fail.
    pub fn fail_for(&self, recipient: &str) {
        self.failing.lock().unwrap().insert(recipient.to_string());
    }

    /// Successfully delivered notifications, in order.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        if self
            .failing
            .lock()
            .unwrap()
            .contains(&notification.recipient)
        {
            return Err(WatchError::fetch(format!(
                "delivery to {} refused",
                notification.recipient
            )));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

// ============ Embedder ============

/// Hashes lowercase words into `dims` buckets. Texts sharing words get
/// similar vectors; identical texts get identical ones.
pub struct KeywordEmbedder {
    dims: usize,
}

impl KeywordEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn bucket(&self, word: &str) -> usize {
        // FNV-1a
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in word.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.dims as u64) as usize
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            v[self.bucket(&word.to_lowercase())] += 1.0;
        }
        v
    }
}

impl Default for KeywordEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

// ============ Clock ============

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap() = at;
    }
}

impl Default for ManualClock {
    /// Starts at 2024-01-01T00:00:00Z.
    fn default() -> Self {
        Self::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
