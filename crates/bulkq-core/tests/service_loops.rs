//! Integration test: the background loops admit jobs, mitigate memory
//! pressure and flush progress, driven by a paused tokio clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bulkq_core::config::BulkqConfig;
use bulkq_core::job::{JobStatus, JobUpdate};
use bulkq_core::monitor::PressureBand;
use bulkq_core::scheduler::Priority;
use bulkq_core::service::JobRequest;
use bulkq_core::store::{JobRecordStore, MemoryJobStore};

#[tokio::test(start_paused = true)]
async fn loops_dispatch_and_flush_until_shutdown() {
    let store = Arc::new(MemoryJobStore::new());
    let f = common::service_over(
        Arc::clone(&store) as Arc<dyn JobRecordStore>,
        BulkqConfig::default(),
    );
    f.service
        .register_job(JobRequest::new("job-1", "owner-1"))
        .await
        .unwrap();
    f.service.start();

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(common::started(&f), vec!["job-1"]);

    f.service
        .state()
        .update("job-1", JobUpdate::new().cursor(42).processed(42))
        .await
        .unwrap();
    assert!(f.service.state().is_dirty("job-1"));

    // Save interval is 30s.
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert!(!f.service.state().is_dirty("job-1"));
    assert_eq!(store.snapshot()["owner-1"]["job-1"].cursor, Some(42));

    f.service
        .state()
        .update("job-1", JobUpdate::new().status(JobStatus::Completed))
        .await
        .unwrap();
    let report = f.service.shutdown().await;
    assert_eq!(report.failed, 0);
    assert_eq!(
        store.snapshot()["owner-1"]["job-1"].status,
        JobStatus::Completed
    );
    assert!(f.service.get_stats().monitor.samples >= 1);
}

#[tokio::test]
async fn emergency_pressure_pauses_low_priority_and_blocks_admission() {
    let f = common::service_over(Arc::new(MemoryJobStore::new()), BulkqConfig::default());
    for (job, priority) in [
        ("bulk", Priority::Low),
        ("routine", Priority::Normal),
        ("vip", Priority::Urgent),
    ] {
        f.service
            .register_job(JobRequest::new(job, "owner-1").priority(priority))
            .await
            .unwrap();
    }
    f.service.scheduler().tick().await;
    assert_eq!(f.service.scheduler().running_len(), 3);

    f.telemetry.set_memory_percent(96.0);
    f.service
        .register_job(JobRequest::new("late", "owner-2"))
        .await
        .unwrap();
    assert_eq!(f.service.monitor().tick().await, Some(PressureBand::Emergency));

    let state = f.service.state();
    assert_eq!(state.status("bulk").await, Some(JobStatus::Paused));
    assert_eq!(state.status("routine").await, Some(JobStatus::Paused));
    assert_eq!(state.status("vip").await, Some(JobStatus::Running));
    // The sweep flushed everything and kept only active jobs cached.
    assert_eq!(state.dirty_count(), 0);
    assert!(!state.is_cached("late"));

    // Above the memory ceiling nothing new is admitted.
    assert!(f.service.scheduler().tick().await.dispatched.is_empty());
    assert!(f.service.scheduler().is_queued("late"));

    let stats = f.service.get_stats();
    assert_eq!(stats.monitor.hook_failures, 0);
    assert_eq!(stats.monitor.actions_run["pause-low-priority"], 1);
    assert_eq!(stats.scheduler.running, 3);
}

#[tokio::test]
async fn plan_for_bulk_splits_oversized_runs() {
    let f = common::service_over(Arc::new(MemoryJobStore::new()), BulkqConfig::default());
    // 16 GiB at 80%: 3276.8 MB available.
    f.telemetry.set_memory_percent(80.0);
    assert_eq!(f.service.plan_for_bulk(20, 100.0).await, 20);
    assert_eq!(f.service.plan_for_bulk(100, 100.0).await, 32);
}
