//! Shared fixtures: a recording executor and a service over injectable telemetry.

use std::sync::{Arc, Mutex};

use bulkq_core::config::BulkqConfig;
use bulkq_core::monitor::{ManualTelemetry, ResourceSample, TelemetrySource};
use bulkq_core::scheduler::JobExecutor;
use bulkq_core::service::BulkService;
use bulkq_core::store::JobRecordStore;

pub type Started = Arc<Mutex<Vec<String>>>;

/// Executor that only records which jobs it was asked to start.
pub fn recording_executor() -> (Arc<dyn JobExecutor>, Started) {
    let started = Started::default();
    let seen = Arc::clone(&started);
    let executor = move |job_id: &str| -> anyhow::Result<()> {
        seen.lock().unwrap().push(job_id.to_string());
        Ok(())
    };
    (Arc::new(executor), started)
}

pub struct Fixture {
    pub service: BulkService,
    pub telemetry: Arc<ManualTelemetry>,
    pub started: Started,
}

pub fn service_over(store: Arc<dyn JobRecordStore>, config: BulkqConfig) -> Fixture {
    let telemetry = Arc::new(ManualTelemetry::new(ResourceSample::synthetic(20.0, 5.0)));
    let (executor, started) = recording_executor();
    let service = BulkService::new(
        config,
        store,
        Arc::clone(&telemetry) as Arc<dyn TelemetrySource>,
        executor,
    );
    Fixture {
        service,
        telemetry,
        started,
    }
}

pub fn started(f: &Fixture) -> Vec<String> {
    f.started.lock().unwrap().clone()
}
