//! End-to-end scenarios through `Watcher`, using in-memory storage and the
//! deterministic doubles from `sitewatch::testing`.

use std::sync::Arc;
use std::time::Duration;

use sitewatch::scheduler::Clock;
use sitewatch::testing::{KeywordEmbedder, ManualClock, MockCompletion, MockFetcher, RecordingNotifier};
use sitewatch::watcher::{Components, Watcher, WatcherOptions};
use sitewatch_core::answer::NO_INFORMATION;
use sitewatch_core::models::{CheckStatus, NewTarget, NotificationKind, Owner, TargetUpdate};
use sitewatch_core::store::memory::InMemoryStore;

const URL: &str = "https://example.com/page";

struct Harness {
    watcher: Watcher,
    fetcher: Arc<MockFetcher>,
    completion: Arc<MockCompletion>,
    notifier: Arc<RecordingNotifier>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let fetcher = Arc::new(MockFetcher::new());
    let completion = Arc::new(MockCompletion::replying("The opening hours moved to ten."));
    let notifier = Arc::new(RecordingNotifier::new());
    let clock = Arc::new(ManualClock::default());
    let watcher = Watcher::new(
        Components {
            records: store.clone(),
            chunks: store,
            embedder: Arc::new(KeywordEmbedder::default()),
            fetcher: fetcher.clone(),
            completion: completion.clone(),
            notifier: notifier.clone(),
            clock: clock.clone(),
        },
        WatcherOptions::default(),
    );
    Harness {
        watcher,
        fetcher,
        completion,
        notifier,
        clock,
    }
}

fn page(body: &str) -> String {
    format!(
        "<html><head><title>Hours</title></head><body><main><p>{}</p></main></body></html>",
        body
    )
}

fn email_target(email: &str, interval_secs: u64) -> NewTarget {
    NewTarget {
        owner: Owner::Email {
            email: email.into(),
        },
        name: Some("Library hours".into()),
        url: URL.into(),
        selector: None,
        xpath: None,
        interval_secs,
        max_pages: 1,
    }
}

#[tokio::test]
async fn test_baseline_unchanged_changed_sequence() {
    let h = harness();
    let original = "The library is open from nine in the morning until five in the evening on weekdays.";
    h.fetcher.set_page(URL, &page(original));

    // Baseline
    let created = h
        .watcher
        .create_target(email_target("owner@example.com", 24 * 3600))
        .await
        .unwrap();
    assert_eq!(created.baseline.status, CheckStatus::Baseline);
    let id = created.target.id.clone();
    let h0 = created.target.last_fingerprint.clone().unwrap();
    assert!(h.watcher.history(&id, 10).await.unwrap().is_empty());
    h.watcher
        .subscribe(&id, "second@example.com")
        .await
        .unwrap()
        .unwrap();

    // Identical content
    h.clock.advance(Duration::from_secs(24 * 3600));
    let second = h.watcher.trigger_now(&id).await.unwrap().unwrap();
    assert_eq!(second.status, CheckStatus::Unchanged);
    let stored = h.watcher.get_target(&id).await.unwrap().unwrap();
    assert_eq!(stored.last_fingerprint.as_deref(), Some(h0.as_str()));

    // Modified content
    h.fetcher.set_page(
        URL,
        &page("The library is open from ten in the morning until six in the evening on weekdays."),
    );
    h.clock.advance(Duration::from_secs(24 * 3600));
    let third = h.watcher.trigger_now(&id).await.unwrap().unwrap();
    assert_eq!(third.status, CheckStatus::Changed);
    assert_eq!(third.summary.as_deref(), Some("The opening hours moved to ten."));

    let changes = h.watcher.history(&id, 10).await.unwrap();
    assert_eq!(changes.len(), 1);
    assert!(!changes[0].summary.is_empty());
    assert!(changes[0].old_preview.contains("nine"));
    assert!(changes[0].new_preview.contains("ten"));

    let stats = h.watcher.stats(&id).await.unwrap();
    assert_eq!(stats.sessions, 2);

    let mut recipients: Vec<String> = h
        .notifier
        .sent()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::Change)
        .map(|n| n.recipient)
        .collect();
    recipients.sort();
    assert_eq!(recipients, vec!["owner@example.com", "second@example.com"]);

    // The summary prompt saw both versions.
    let (prompt, _) = h.completion.prompts().last().cloned().unwrap();
    assert!(prompt.contains("nine"));
    assert!(prompt.contains("ten"));
}

#[tokio::test]
async fn test_reschedule_keeps_single_job_with_new_interval() {
    let h = harness();
    h.fetcher.set_page(URL, &page(&"Weekly notices for members. ".repeat(5)));
    let id = h
        .watcher
        .create_target(email_target("owner@example.com", 3600))
        .await
        .unwrap()
        .target
        .id;

    h.clock.advance(Duration::from_secs(120));
    let update = TargetUpdate {
        interval_secs: Some(600),
        ..Default::default()
    };
    h.watcher.update_target(&id, &update).await.unwrap().unwrap();

    let jobs = h.watcher.list_scheduled_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].target_id, id);
    assert_eq!(jobs[0].interval_secs, 600);
    assert_eq!(
        jobs[0].next_fire_time,
        h.clock.now() + chrono::Duration::seconds(600)
    );
}

#[tokio::test]
async fn test_delete_removes_job_and_chunks() {
    let h = harness();
    h.fetcher.set_page(URL, &page(&"Events calendar for the spring season. ".repeat(5)));
    let id = h
        .watcher
        .create_target(email_target("owner@example.com", 3600))
        .await
        .unwrap()
        .target
        .id;
    assert!(h.watcher.stats(&id).await.unwrap().total_chunks > 0);

    assert!(h.watcher.delete_target(&id).await.unwrap());
    assert!(h.watcher.list_scheduled_jobs().is_empty());
    assert_eq!(h.watcher.stats(&id).await.unwrap().total_chunks, 0);
    assert!(h.watcher.get_target(&id).await.unwrap().is_none());
    assert!(h.watcher.trigger_now(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_during_check_leaves_nothing_behind() {
    let h = harness();
    h.fetcher.set_page(URL, &page(&"Events calendar for the spring season. ".repeat(5)));
    let id = h
        .watcher
        .create_target(email_target("owner@example.com", 3600))
        .await
        .unwrap()
        .target
        .id;

    h.fetcher.set_page(URL, &page(&"Events calendar for the summer season. ".repeat(5)));
    let gate = h.fetcher.hold();

    let (checked, deleted) = tokio::join!(h.watcher.trigger_now(&id), async {
        gate.wait_entered().await;
        let (deleted, _) = tokio::join!(h.watcher.delete_target(&id), async {
            tokio::task::yield_now().await;
            gate.release();
        });
        deleted
    });

    assert_eq!(checked.unwrap().unwrap().status, CheckStatus::Changed);
    assert!(deleted.unwrap());
    assert_eq!(h.watcher.stats(&id).await.unwrap().total_chunks, 0);
    assert!(h.watcher.history(&id, 10).await.unwrap().is_empty());
    assert!(h.watcher.get_target(&id).await.unwrap().is_none());
    assert!(h.watcher.list_scheduled_jobs().is_empty());
}

#[tokio::test]
async fn test_ask_on_empty_index() {
    let h = harness();
    // No page configured: the baseline fetch fails and nothing is indexed.
    let id = h
        .watcher
        .create_target(email_target("owner@example.com", 3600))
        .await
        .unwrap()
        .target
        .id;

    let answer = h.watcher.ask(&id, "When do you open?").await.unwrap().unwrap();
    assert_eq!(answer.text, NO_INFORMATION);
    assert_eq!(answer.chunks_used, 0);
    assert_eq!(answer.source_url, URL);
}

#[tokio::test]
async fn test_ask_with_only_boilerplate_uses_fallback_chunks() {
    let h = harness();
    h.fetcher.set_page(
        URL,
        &page("Copyright 2024 Example Library. All rights reserved. Powered by a site builder."),
    );
    let id = h
        .watcher
        .create_target(email_target("owner@example.com", 3600))
        .await
        .unwrap()
        .target
        .id;

    h.completion.push_reply("I don't have that information in the provided content.");
    let answer = h
        .watcher
        .ask(&id, "Who runs the library?")
        .await
        .unwrap()
        .unwrap();
    assert!(!answer.text.is_empty());
    assert!(answer.chunks_used >= 1);

    let (prompt, _) = h.completion.prompts().last().cloned().unwrap();
    assert!(prompt.contains("Copyright 2024"));
}

#[tokio::test]
async fn test_failed_completion_masks_answer() {
    let h = harness();
    h.fetcher.set_page(URL, &page(&"Membership costs twenty dollars per year for adults. ".repeat(4)));
    let id = h
        .watcher
        .create_target(email_target("owner@example.com", 3600))
        .await
        .unwrap()
        .target
        .id;

    h.completion.push_failure("rate limited");
    let answer = h.watcher.ask(&id, "How much is membership?").await.unwrap().unwrap();
    assert!(!answer.text.contains("rate limited"));
    assert!(!answer.text.is_empty());
}

#[tokio::test]
async fn test_start_loads_active_targets() {
    let h = harness();
    h.fetcher.set_page(URL, &page(&"Branch locations and parking details. ".repeat(4)));
    let a = h
        .watcher
        .create_target(email_target("a@example.com", 3600))
        .await
        .unwrap()
        .target
        .id;
    let b = h
        .watcher
        .create_target(email_target("b@example.com", 3600))
        .await
        .unwrap()
        .target
        .id;
    let pause = TargetUpdate {
        is_active: Some(false),
        ..Default::default()
    };
    h.watcher.update_target(&b, &pause).await.unwrap();

    // A fresh scheduler would only see the active target.
    h.watcher.scheduler().cancel(&a);
    assert_eq!(h.watcher.start().await.unwrap(), 1);
    let jobs = h.watcher.list_scheduled_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].target_id, a);
    h.watcher.stop().await;
}
