//! `SqliteStore` against a real database file in a temp directory.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use sitewatch::db::connect_path;
use sitewatch::migrate::apply_schema;
use sitewatch::sqlite_store::SqliteStore;
use sitewatch::testing::KeywordEmbedder;
use sitewatch_core::chunk::ChunkOptions;
use sitewatch_core::index::{RetrievalIndex, SessionMeta};
use sitewatch_core::models::{ChangeRecord, MonitoredTarget, Owner, Subscription, TargetUpdate};
use sitewatch_core::store::{ChunkStore, RecordStore};

async fn store() -> (TempDir, Arc<SqliteStore>) {
    let tmp = TempDir::new().unwrap();
    let pool = connect_path(&tmp.path().join("data").join("sitewatch.sqlite"))
        .await
        .unwrap();
    apply_schema(&pool).await.unwrap();
    // Applying twice is harmless.
    apply_schema(&pool).await.unwrap();
    (tmp, Arc::new(SqliteStore::new(pool)))
}

fn target(id: &str) -> MonitoredTarget {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    MonitoredTarget {
        id: id.into(),
        owner: Owner::Agent {
            agent_id: "agent-9".into(),
        },
        name: Some("Pricing".into()),
        url: "https://example.com/pricing".into(),
        selector: Some("main".into()),
        xpath: None,
        interval_secs: 3600,
        max_pages: 1,
        is_active: true,
        last_fingerprint: None,
        last_snapshot: None,
        last_checked_at: None,
        created_at: at,
        updated_at: at,
    }
}

fn meta(at: chrono::DateTime<Utc>) -> SessionMeta<'static> {
    SessionMeta {
        source_url: "https://example.com/pricing",
        selector_used: Some("main"),
        scraped_at: at,
    }
}

#[tokio::test]
async fn test_target_crud_roundtrip() {
    let (_tmp, store) = store().await;
    let t = target("t1");
    store.insert_target(&t).await.unwrap();

    let loaded = store.get_target("t1").await.unwrap().unwrap();
    assert_eq!(loaded, t);
    assert!(store.get_target("nope").await.unwrap().is_none());

    let update = TargetUpdate {
        interval_secs: Some(7200),
        selector: Some(None),
        is_active: Some(false),
        ..Default::default()
    };
    let updated = store
        .update_target("t1", &update, t.created_at + Duration::minutes(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.interval_secs, 7200);
    assert_eq!(updated.selector, None);
    assert!(!updated.is_active);
    assert!(store.list_targets(true).await.unwrap().is_empty());
    assert_eq!(store.list_targets(false).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_record_check_keeps_fingerprint_when_none() {
    let (_tmp, store) = store().await;
    let t = target("t1");
    store.insert_target(&t).await.unwrap();

    let first = t.created_at + Duration::hours(1);
    store
        .record_check("t1", Some("abc"), Some("Plans from ten dollars."), first)
        .await
        .unwrap();
    let second = first + Duration::hours(1);
    store.record_check("t1", None, None, second).await.unwrap();

    let loaded = store.get_target("t1").await.unwrap().unwrap();
    assert_eq!(loaded.last_fingerprint.as_deref(), Some("abc"));
    assert_eq!(loaded.last_snapshot.as_deref(), Some("Plans from ten dollars."));
    assert_eq!(loaded.last_checked_at, Some(second));
}

#[tokio::test]
async fn test_changes_newest_first_and_cascade() {
    let (_tmp, store) = store().await;
    let t = target("t1");
    store.insert_target(&t).await.unwrap();

    for i in 0..3 {
        store
            .insert_change(&ChangeRecord {
                id: format!("c{}", i),
                target_id: "t1".into(),
                old_preview: "old".into(),
                new_preview: "new".into(),
                summary: format!("change {}", i),
                detected_at: t.created_at + Duration::hours(i),
            })
            .await
            .unwrap();
    }
    store
        .add_subscription(&Subscription {
            id: "s1".into(),
            target_id: "t1".into(),
            email: "a@example.com".into(),
            is_active: true,
            created_at: t.created_at,
        })
        .await
        .unwrap();

    let changes = store.list_changes("t1", 2).await.unwrap();
    assert_eq!(changes.len(), 2);
    assert_eq!(changes[0].summary, "change 2");
    assert_eq!(changes[1].summary, "change 1");

    assert!(store.set_subscription_active("s1", false).await.unwrap());
    assert!(!store.list_subscriptions("t1").await.unwrap()[0].is_active);

    assert!(store.delete_target("t1").await.unwrap());
    assert!(!store.delete_target("t1").await.unwrap());
    assert!(store.list_changes("t1", 10).await.unwrap().is_empty());
    assert!(store.list_subscriptions("t1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_index_sessions_query_and_purge() {
    let (_tmp, store) = store().await;
    let index = RetrievalIndex::new(
        store.clone(),
        Arc::new(KeywordEmbedder::default()),
        ChunkOptions::default(),
    );
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

    let first = "Basic plan costs ten dollars per month and includes five projects.\n\n\
                 Support is available by email during business hours.";
    let second = "Basic plan costs twelve dollars per month and includes eight projects.\n\n\
                  Support is available by chat around the clock.";
    index.upsert("t1", first, &meta(at)).await.unwrap();
    index
        .upsert("t1", second, &meta(at + Duration::days(1)))
        .await
        .unwrap();

    let stats = index.stats("t1").await.unwrap();
    assert_eq!(stats.sessions, 2);
    assert_eq!(stats.urls, vec!["https://example.com/pricing".to_string()]);

    let hits = index.query("t1", "support chat", 3).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));

    assert!(index.query("other", "support", 3).await.unwrap().is_empty());

    let removed = store.purge("t1").await.unwrap();
    assert_eq!(removed, stats.total_chunks);
    assert_eq!(store.count("t1").await.unwrap(), 0);
    assert_eq!(store.purge("t1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_retention_drops_oldest_sessions() {
    let (_tmp, store) = store().await;
    let index = RetrievalIndex::new(
        store.clone(),
        Arc::new(KeywordEmbedder::default()),
        ChunkOptions::default(),
    )
    .with_retention(Some(1));
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

    index
        .upsert("t1", &"First version of the pricing page text. ".repeat(3), &meta(at))
        .await
        .unwrap();
    let summary = index
        .upsert(
            "t1",
            &"Second version of the pricing page text. ".repeat(3),
            &meta(at + Duration::days(1)),
        )
        .await
        .unwrap();
    assert!(summary.retired >= 1);

    let stats = index.stats("t1").await.unwrap();
    assert_eq!(stats.sessions, 1);
    let hits = index.query("t1", "pricing page text", 5).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.chunk.text.starts_with("Second version")));
}

#[tokio::test]
async fn test_concurrent_sessions_for_one_target_both_commit() {
    let (_tmp, store) = store().await;
    let index = RetrievalIndex::new(
        store.clone(),
        Arc::new(KeywordEmbedder::default()),
        ChunkOptions::default(),
    );
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let text = "Opening hours are nine to five on weekdays and ten to two on Saturdays.\n\n\
                The branch is closed on public holidays.";

    let meta_a = meta(at);
    let meta_b = meta(at + Duration::minutes(1));
    let (a, b) = tokio::join!(
        index.upsert("t1", text, &meta_a),
        index.upsert("t1", text, &meta_b),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(index.stats("t1").await.unwrap().sessions, 2);
}
