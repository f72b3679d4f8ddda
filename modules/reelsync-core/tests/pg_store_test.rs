//! Integration tests for the Postgres backends.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use reelsync_core::{
    AuditSink, Dataset, DatasetStore, Metrics, MergeMode, PgAuditSink, PgDatasetStore,
    PgRunRegistry, Post, ProfileKey, RunOutcome, RunRegistry, RunStatus, SyncLogEntry,
    SyncOutcome,
};

/// Get a migrated test database pool, or skip if no test DB is available.
async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;
    reelsync_core::migrate(&pool).await.ok()?;
    Some(pool)
}

/// Unique per test so parallel tests never share rows.
fn fresh_key() -> ProfileKey {
    ProfileKey::parse("tiktok", &format!("t{}", Uuid::new_v4().simple())).unwrap()
}

fn post(id: &str, likes: u64) -> Post {
    Post {
        id: id.to_string(),
        url: Some(format!("https://www.tiktok.com/@nick/video/{id}")),
        caption: Some("caption".into()),
        published_at: Some(Utc::now()),
        metrics: Metrics {
            like_count: likes,
            ..Default::default()
        },
    }
}

// =========================================================================
// Dataset store
// =========================================================================

#[tokio::test]
async fn dataset_absent_then_upserted() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgDatasetStore::new(pool);
    let key = fresh_key();

    assert!(store.load(&key).await.unwrap().is_none());

    let mut dataset = Dataset::empty(key.clone());
    dataset.posts = vec![post("v2", 5), post("v1", 10)];
    dataset.total_posts = 2;
    dataset.last_synced_at = Some(Utc::now());
    assert!(store.write_if(&dataset, None).await.unwrap());

    dataset.posts[1].metrics.like_count = 50;
    assert!(store.write_if(&dataset, Some(1)).await.unwrap());

    let stored = store.load(&key).await.unwrap().unwrap();
    assert_eq!(stored.version, 2);
    let read = stored.value;
    assert_eq!(read.total_posts, 2);
    assert_eq!(read.posts[0].id, "v2");
    assert_eq!(read.posts[1].metrics.like_count, 50);
    assert_eq!(read.key, key);
}

#[tokio::test]
async fn dataset_write_from_stale_version_is_rejected() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = PgDatasetStore::new(pool);
    let key = fresh_key();

    let mut dataset = Dataset::empty(key.clone());
    dataset.posts = vec![post("v1", 10)];
    dataset.total_posts = 1;
    assert!(store.write_if(&dataset, None).await.unwrap());
    assert!(!store.write_if(&dataset, None).await.unwrap());

    dataset.posts[0].metrics.like_count = 50;
    assert!(store.write_if(&dataset, Some(1)).await.unwrap());

    dataset.posts[0].metrics.like_count = 99;
    assert!(!store.write_if(&dataset, Some(1)).await.unwrap());

    let read = store.read(&key).await.unwrap().unwrap();
    assert_eq!(read.posts[0].metrics.like_count, 50);
}

#[tokio::test]
async fn concurrent_read_merge_write_cycles_keep_every_post() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let store = Arc::new(PgDatasetStore::new(pool));
    let key = fresh_key();

    // Each writer loops load -> add its post -> write_if until its write lands,
    // the same cycle every orchestrator instance runs on completion.
    let writers = (0..8).map(|i| {
        let store = store.clone();
        let key = key.clone();
        async move {
            loop {
                let current = store.load(&key).await.unwrap();
                let (mut dataset, expected) = match current {
                    Some(v) => (v.value, Some(v.version)),
                    None => (Dataset::empty(key.clone()), None),
                };
                dataset.posts.push(post(&format!("v{i}"), i));
                dataset.total_posts = dataset.posts.len();
                if store.write_if(&dataset, expected).await.unwrap() {
                    break;
                }
            }
        }
    });
    futures::future::join_all(writers).await;

    let stored = store.load(&key).await.unwrap().unwrap();
    assert_eq!(stored.value.total_posts, 8);
    assert_eq!(stored.version, 8);
}

// =========================================================================
// Run registry
// =========================================================================

#[tokio::test]
async fn registry_start_is_exclusive() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let registry = PgRunRegistry::new(pool, Some(Duration::minutes(30)));
    let key = fresh_key();
    let now = Utc::now();

    let first = registry.try_start(&key, "job-1", Some("ds-1"), now).await.unwrap();
    let second = registry.try_start(&key, "job-2", Some("ds-2"), now).await.unwrap();

    assert!(first.started);
    assert!(!second.started);
    assert_eq!(second.record.job_id, "job-1");
    assert_eq!(second.record.result_set_id.as_deref(), Some("ds-1"));
}

#[tokio::test]
async fn registry_concurrent_starts_have_one_winner() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let registry = Arc::new(PgRunRegistry::new(pool, None));
    let key = fresh_key();

    let attempts = (0..8).map(|i| {
        let registry = registry.clone();
        let key = key.clone();
        async move {
            registry
                .try_start(&key, &format!("job-{i}"), None, Utc::now())
                .await
                .unwrap()
        }
    });
    let results = futures::future::join_all(attempts).await;

    let winners: Vec<_> = results.iter().filter(|r| r.started).collect();
    assert_eq!(winners.len(), 1);
    let winner = &winners[0].record.job_id;
    assert!(results.iter().all(|r| &r.record.job_id == winner));
}

#[tokio::test]
async fn registry_resolve_and_restart() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let registry = PgRunRegistry::new(pool, None);
    let key = fresh_key();
    let now = Utc::now();

    registry.try_start(&key, "job-1", None, now).await.unwrap();
    let resolved = registry
        .resolve(
            &key,
            "job-1",
            RunOutcome::Succeeded {
                result_set_id: Some("ds-1".into()),
            },
            now,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.status, RunStatus::Succeeded);
    assert_eq!(resolved.result_set_id.as_deref(), Some("ds-1"));

    // Duplicate notification is a no-op.
    assert!(registry
        .resolve(&key, "job-1", RunOutcome::Failed, now)
        .await
        .unwrap()
        .is_none());

    registry.mark_fetched(&key, now).await.unwrap();
    let restarted = registry.try_start(&key, "job-2", None, now).await.unwrap();
    assert!(restarted.started);
    assert_eq!(restarted.record.status, RunStatus::Running);
    assert!(restarted.record.resolved_at.is_none());
    assert!(restarted.record.last_fetched_at.is_some());
}

#[tokio::test]
async fn registry_stale_run_is_replaced() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let registry = PgRunRegistry::new(pool, Some(Duration::minutes(30)));
    let key = fresh_key();

    registry
        .try_start(&key, "stuck", None, Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    let fresh = registry.try_start(&key, "job-2", None, Utc::now()).await.unwrap();

    assert!(fresh.started);
    assert_eq!(fresh.record.job_id, "job-2");
}

// =========================================================================
// Audit sink
// =========================================================================

#[tokio::test]
async fn audit_sink_appends_rows() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let sink = PgAuditSink::new(pool.clone());
    let key = fresh_key();

    let mut entry = SyncLogEntry::new(key.clone(), "job-1", SyncOutcome::Succeeded);
    entry.mode = Some(MergeMode::RefreshCounts);
    entry.posts_updated = 3;
    sink.append(&entry).await.unwrap();

    let (mode, updated): (Option<String>, i64) = sqlx::query_as(
        "SELECT mode, posts_updated FROM sync_log WHERE id = $1",
    )
    .bind(entry.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(mode.as_deref(), Some("refresh-counts"));
    assert_eq!(updated, 3);
}

#[tokio::test]
async fn audit_sink_keeps_counts_beyond_32_bits() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let sink = PgAuditSink::new(pool.clone());
    let key = fresh_key();

    let mut entry = SyncLogEntry::new(key, "job-1", SyncOutcome::Succeeded);
    entry.posts_fetched = 3_000_000_000;
    entry.total_posts = 3_000_000_000;
    sink.append(&entry).await.unwrap();

    let (fetched, total): (i64, i64) = sqlx::query_as(
        "SELECT posts_fetched, total_posts FROM sync_log WHERE id = $1",
    )
    .bind(entry.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(fetched, 3_000_000_000);
    assert_eq!(total, 3_000_000_000);
}
