use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use super::*;
use crate::error::StoreError;
use crate::store::{MemoryJobStore, OwnerJobs};
use crate::ticker::Periodic;

/// Memory store whose reads or writes can be switched off.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryJobStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    fn set_reads_failing(&self, failing: bool) {
        self.fail_reads.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobRecordStore for FlakyStore {
    async fn get_owner_jobs(&self, owner_id: &str) -> Result<OwnerJobs, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("read quota exceeded".into()));
        }
        self.inner.get_owner_jobs(owner_id).await
    }

    async fn put_owner_jobs(&self, owner_id: &str, jobs: &OwnerJobs) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("quota exceeded".into()));
        }
        self.inner.put_owner_jobs(owner_id, jobs).await
    }

    async fn list_owners(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list_owners().await
    }
}

fn cache_over(store: Arc<MemoryJobStore>, batch: usize) -> StateCache {
    StateCache::new(store, batch)
}

async fn create(cache: &StateCache, job_id: &str, owner_id: &str) -> JobRecord {
    cache
        .create(job_id, owner_id, Some(0), JobConfig::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn create_persists_immediately() {
    let store = Arc::new(MemoryJobStore::new());
    let cache = cache_over(Arc::clone(&store), DEFAULT_BATCH_SAVE_SIZE);

    let record = create(&cache, "j1", "u1").await;
    assert_eq!(record.status, JobStatus::Pending);
    assert!(!cache.is_dirty("j1"));
    assert_eq!(store.snapshot()["u1"]["j1"].status, JobStatus::Pending);
    assert_eq!(cache.stats().created_total, 1);
}

#[tokio::test]
async fn duplicate_create_is_rejected() {
    let cache = cache_over(Arc::new(MemoryJobStore::new()), DEFAULT_BATCH_SAVE_SIZE);
    create(&cache, "j1", "u1").await;
    let err = cache
        .create("j1", "u2", None, JobConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::AlreadyExists(id) if id == "j1"));
    assert_eq!(cache.get("j1").await.unwrap().owner_id, "u1");
}

#[tokio::test]
async fn create_rejects_id_evicted_from_cache() {
    let store = Arc::new(MemoryJobStore::new());
    let cache = cache_over(Arc::clone(&store), 10);
    create(&cache, "a", "u1").await;
    for status in [JobStatus::Running, JobStatus::Completed] {
        cache
            .update("a", JobUpdate::new().status(status).cursor(250))
            .await
            .unwrap();
    }
    cache.flush_all_dirty().await;
    assert_eq!(cache.purge_terminal(), 1);
    assert!(!cache.is_cached("a"));

    let err = cache
        .create("a", "u1", None, JobConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::AlreadyExists(id) if id == "a"));
    let stored = &store.snapshot()["u1"]["a"];
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.cursor, Some(250));
}

#[tokio::test]
async fn create_rejects_id_saved_before_restart() {
    let store = Arc::new(MemoryJobStore::new());
    {
        let before = cache_over(Arc::clone(&store), 10);
        create(&before, "a", "u1").await;
        before
            .update(
                "a",
                JobUpdate::new()
                    .status(JobStatus::Running)
                    .cursor(900)
                    .processed(40),
            )
            .await
            .unwrap();
        before.flush_all_dirty().await;
    }

    let after = cache_over(Arc::clone(&store), 10);
    let err = after
        .create("a", "u1", Some(0), JobConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::AlreadyExists(_)));
    assert!(!after.is_cached("a"));
    let stored = &store.snapshot()["u1"]["a"];
    assert_eq!(stored.status, JobStatus::Running);
    assert_eq!(stored.cursor, Some(900));
    assert_eq!(stored.counters.processed, 40);
}

#[tokio::test]
async fn create_refuses_when_owner_document_is_unreadable() {
    let store = Arc::new(FlakyStore::default());
    let cache = StateCache::new(Arc::clone(&store) as Arc<dyn JobRecordStore>, 10);
    store.set_reads_failing(true);
    let err = cache
        .create("j1", "u1", None, JobConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::Persistence { ref owner_id, .. } if owner_id == "u1"));
    assert!(!cache.is_cached("j1"));
    assert_eq!(store.inner.write_count(), 0);
}

#[tokio::test]
async fn failed_initial_write_stays_dirty_until_next_flush() {
    let store = Arc::new(FlakyStore::default());
    let cache = StateCache::new(Arc::clone(&store) as Arc<dyn JobRecordStore>, 10);

    store.set_failing(true);
    let err = cache
        .create("j1", "u1", None, JobConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StateError::Persistence { ref owner_id, .. } if owner_id == "u1"));
    assert!(cache.is_cached("j1"));
    assert!(cache.is_dirty("j1"));

    let report = cache.flush_all_dirty().await;
    assert_eq!(report.failed, 1);
    assert!(cache.is_dirty("j1"));
    assert_eq!(cache.stats().flush_failures, 2);

    store.set_failing(false);
    let report = cache.flush_all_dirty().await;
    assert_eq!(report.persisted, 1);
    assert!(!cache.is_dirty("j1"));
    assert!(store.inner.snapshot()["u1"].contains_key("j1"));
}

#[tokio::test]
async fn flush_groups_dirty_records_by_owner() {
    let store = Arc::new(MemoryJobStore::new());
    let cache = cache_over(Arc::clone(&store), 10);
    for id in ["a1", "a2", "a3"] {
        create(&cache, id, "alice").await;
    }
    for id in ["b1", "b2"] {
        create(&cache, id, "bob").await;
    }
    for id in ["a1", "a2", "a3", "b1", "b2"] {
        assert!(cache
            .update(id, JobUpdate::new().status(JobStatus::Running).cursor(7))
            .await
            .unwrap());
    }
    assert_eq!(cache.dirty_count(), 5);

    let writes_before = store.write_count();
    let report = cache.flush_all_dirty().await;
    assert_eq!(
        report,
        FlushReport {
            persisted: 5,
            failed: 0,
            owners_written: 2,
        }
    );
    assert_eq!(store.write_count() - writes_before, 2);
    assert_eq!(cache.dirty_count(), 0);
    assert_eq!(store.snapshot()["alice"]["a2"].cursor, Some(7));

    // Nothing left to do: a second pass writes nothing.
    let report = cache.flush_all_dirty().await;
    assert!(report.is_empty());
    assert_eq!(store.write_count() - writes_before, 2);
}

#[tokio::test]
async fn flush_respects_batch_size() {
    let store = Arc::new(MemoryJobStore::new());
    let cache = cache_over(Arc::clone(&store), 2);
    for id in ["j1", "j2", "j3"] {
        create(&cache, id, "u1").await;
        cache.update(id, JobUpdate::new().progress(10.0)).await.unwrap();
    }
    let report = cache.flush_all_dirty().await;
    assert_eq!(report.persisted, 3);
    // Two chunks, so the single owner is written twice.
    assert_eq!(report.owners_written, 2);
}

#[tokio::test]
async fn flush_now_persists_single_record() {
    let store = Arc::new(MemoryJobStore::new());
    let cache = cache_over(Arc::clone(&store), 10);
    create(&cache, "j1", "u1").await;
    create(&cache, "j2", "u1").await;
    cache.update("j1", JobUpdate::new().cursor(50)).await.unwrap();
    cache.update("j2", JobUpdate::new().cursor(60)).await.unwrap();

    assert!(cache.flush_now("j1").await);
    assert!(!cache.is_dirty("j1"));
    assert!(cache.is_dirty("j2"));
    let doc = &store.snapshot()["u1"];
    assert_eq!(doc["j1"].cursor, Some(50));
    assert_eq!(doc["j2"].cursor, Some(0));

    assert!(!cache.flush_now("missing").await);
}

#[tokio::test]
async fn miss_scans_store_and_marks_resumed() {
    let store = Arc::new(MemoryJobStore::new());
    {
        let first = cache_over(Arc::clone(&store), 10);
        create(&first, "j1", "u1").await;
        create(&first, "j2", "u2").await;
        first
            .update("j2", JobUpdate::new().status(JobStatus::Running).cursor(1_204))
            .await
            .unwrap();
        first.flush_all_dirty().await;
    }

    let cache = cache_over(Arc::clone(&store), 10);
    let record = cache.get("j2").await.unwrap();
    assert!(record.resumed);
    assert_eq!(record.status, JobStatus::Running);
    assert_eq!(record.cursor, Some(1_204));
    assert_eq!(cache.stats().store_scans, 1);

    // Now cached: no further scan.
    cache.get("j2").await.unwrap();
    assert_eq!(cache.stats().store_scans, 1);

    assert!(cache.get("nope").await.is_none());
    assert_eq!(cache.stats().store_scans, 2);
}

#[tokio::test]
async fn update_unknown_job_returns_false() {
    let cache = cache_over(Arc::new(MemoryJobStore::new()), 10);
    assert!(!cache
        .update("ghost", JobUpdate::new().progress(5.0))
        .await
        .unwrap());
}

#[tokio::test]
async fn invalid_transition_is_rejected_and_not_dirty() {
    let cache = cache_over(Arc::new(MemoryJobStore::new()), 10);
    create(&cache, "j1", "u1").await;
    let err = cache
        .update("j1", JobUpdate::new().status(JobStatus::Completed))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StateError::InvalidTransition {
            from: JobStatus::Pending,
            to: JobStatus::Completed,
            ..
        }
    ));
    assert!(!cache.is_dirty("j1"));
    assert_eq!(cache.status("j1").await, Some(JobStatus::Pending));
}

#[tokio::test]
async fn terminal_transitions_are_counted() {
    let cache = cache_over(Arc::new(MemoryJobStore::new()), 10);
    for id in ["a", "b", "c"] {
        create(&cache, id, "u1").await;
        cache
            .update(id, JobUpdate::new().status(JobStatus::Running))
            .await
            .unwrap();
    }
    cache
        .update("a", JobUpdate::new().status(JobStatus::Completed))
        .await
        .unwrap();
    cache.update("b", JobUpdate::new().fail("boom")).await.unwrap();

    let stats = cache.stats();
    assert_eq!(stats.running, 1);
    assert_eq!(stats.completed_total, 1);
    assert_eq!(stats.failed_total, 1);
    assert_eq!(stats.cancelled_total, 0);
    let b = cache.get("b").await.unwrap();
    assert_eq!(b.error_message.as_deref(), Some("boom"));
    assert!(b.ended_at.is_some());
}

#[tokio::test]
async fn owner_jobs_include_unsaved_records() {
    let store = Arc::new(FlakyStore::default());
    let cache = StateCache::new(Arc::clone(&store) as Arc<dyn JobRecordStore>, 10);
    cache
        .create("j1", "u1", None, JobConfig::default())
        .await
        .unwrap();
    store.set_failing(true);
    let _ = cache.create("j2", "u1", None, JobConfig::default()).await;

    let jobs = cache.get_owner_jobs("u1").await.unwrap();
    let ids: Vec<_> = jobs.iter().map(|r| r.job_id.as_str()).collect();
    assert_eq!(ids, vec!["j1", "j2"]);
}

#[tokio::test]
async fn cleanup_removes_only_expired_terminal_records() {
    let store = Arc::new(MemoryJobStore::new());
    let cache = cache_over(Arc::clone(&store), 10);
    let now = Utc::now();
    for id in ["old", "recent", "live"] {
        create(&cache, id, "u1").await;
        cache
            .update(id, JobUpdate::new().status(JobStatus::Running))
            .await
            .unwrap();
    }
    for id in ["old", "recent"] {
        cache
            .update(id, JobUpdate::new().status(JobStatus::Completed))
            .await
            .unwrap();
    }
    {
        let mut c = lock(&cache.cache);
        c.get_mut("old").unwrap().record.ended_at = Some(now - Duration::hours(25));
        c.get_mut("recent").unwrap().record.ended_at = Some(now - Duration::hours(23));
    }
    cache.flush_all_dirty().await;

    let removed = cache
        .cleanup_terminal_at("u1", Duration::hours(24), now)
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(!cache.is_cached("old"));
    assert!(cache.is_cached("recent"));
    let doc = &store.snapshot()["u1"];
    assert!(!doc.contains_key("old"));
    assert!(doc.contains_key("recent"));
    assert!(doc.contains_key("live"));
}

#[tokio::test]
async fn purge_terminal_keeps_dirty_and_active_records() {
    let cache = cache_over(Arc::new(MemoryJobStore::new()), 10);
    for id in ["done", "done-dirty", "running"] {
        create(&cache, id, "u1").await;
        cache
            .update(id, JobUpdate::new().status(JobStatus::Running))
            .await
            .unwrap();
    }
    cache
        .update("done", JobUpdate::new().status(JobStatus::Completed))
        .await
        .unwrap();
    cache.flush_all_dirty().await;
    cache
        .update("done-dirty", JobUpdate::new().status(JobStatus::Cancelled))
        .await
        .unwrap();

    assert_eq!(cache.purge_terminal(), 1);
    assert!(!cache.is_cached("done"));
    assert!(cache.is_cached("done-dirty"));
    assert!(cache.is_cached("running"));

    // Evicted records are still reachable through the store.
    assert_eq!(cache.status("done").await, Some(JobStatus::Completed));
}

#[tokio::test]
async fn sweep_flushes_then_keeps_only_active_records() {
    let store = Arc::new(MemoryJobStore::new());
    let cache = cache_over(Arc::clone(&store), 10);
    for id in ["pending", "running", "paused", "failed"] {
        create(&cache, id, "u1").await;
    }
    for id in ["running", "paused", "failed"] {
        cache
            .update(id, JobUpdate::new().status(JobStatus::Running))
            .await
            .unwrap();
    }
    cache
        .update("paused", JobUpdate::new().status(JobStatus::Paused))
        .await
        .unwrap();
    cache.update("failed", JobUpdate::new().fail("x")).await.unwrap();

    assert_eq!(cache.sweep().await, 2);
    assert_eq!(cache.dirty_count(), 0);
    assert!(cache.is_cached("running"));
    assert!(cache.is_cached("paused"));
    assert!(!cache.is_cached("pending"));
    assert_eq!(store.snapshot()["u1"]["failed"].status, JobStatus::Failed);
}

#[tokio::test]
async fn finish_flushes_everything_dirty() {
    let store = Arc::new(MemoryJobStore::new());
    let cache = cache_over(Arc::clone(&store), 10);
    create(&cache, "j1", "u1").await;
    cache
        .update("j1", JobUpdate::new().status(JobStatus::Running).processed(3))
        .await
        .unwrap();

    cache.finish().await;
    assert_eq!(cache.dirty_count(), 0);
    assert_eq!(store.snapshot()["u1"]["j1"].counters.processed, 3);
}

/// One cache plays the service, the other a CLI invocation over the same store.
async fn service_and_cli(store: &Arc<MemoryJobStore>) -> (StateCache, StateCache) {
    let service = cache_over(Arc::clone(store), 10);
    create(&service, "a", "u1").await;
    service
        .update("a", JobUpdate::new().status(JobStatus::Running).cursor(10))
        .await
        .unwrap();
    service.flush_all_dirty().await;
    let cli = cache_over(Arc::clone(store), 10);
    (service, cli)
}

#[tokio::test]
async fn stop_stored_by_another_cache_survives_write_back() {
    let store = Arc::new(MemoryJobStore::new());
    let (service, cli) = service_and_cli(&store).await;

    cli.update("a", JobUpdate::new().status(JobStatus::Cancelled))
        .await
        .unwrap();
    assert!(cli.flush_now("a").await);

    // The service still holds Running and keeps reporting progress.
    service
        .update("a", JobUpdate::new().cursor(20).processed(20))
        .await
        .unwrap();
    let report = service.flush_all_dirty().await;
    assert_eq!(report.persisted, 1);

    let stored = &store.snapshot()["u1"]["a"];
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert_eq!(stored.cursor, Some(20));
    assert_eq!(service.status("a").await, Some(JobStatus::Cancelled));
    assert!(!service.is_dirty("a"));
    assert_eq!(service.stats().cancelled_total, 1);
}

#[tokio::test]
async fn sync_picks_up_pause_stored_by_another_cache() {
    let store = Arc::new(MemoryJobStore::new());
    let (service, cli) = service_and_cli(&store).await;

    cli.update("a", JobUpdate::new().status(JobStatus::Paused))
        .await
        .unwrap();
    assert!(cli.flush_now("a").await);
    assert_eq!(service.status("a").await, Some(JobStatus::Running));

    let ids = vec!["a".to_string(), "unknown".to_string()];
    assert_eq!(service.sync_external_stops(&ids).await, 1);
    assert_eq!(service.status("a").await, Some(JobStatus::Paused));
    assert_eq!(service.sync_external_stops(&ids).await, 0);
}

#[tokio::test]
async fn own_pause_and_resume_are_not_mistaken_for_external_stops() {
    let store = Arc::new(MemoryJobStore::new());
    let (service, _cli) = service_and_cli(&store).await;

    for status in [JobStatus::Paused, JobStatus::Running] {
        service
            .update("a", JobUpdate::new().status(status))
            .await
            .unwrap();
        service.flush_all_dirty().await;
        assert_eq!(store.snapshot()["u1"]["a"].status, status);
    }
    assert_eq!(service.sync_external_stops(&["a".to_string()]).await, 0);
    assert_eq!(service.status("a").await, Some(JobStatus::Running));
}
