//! Resource monitor and memory mitigation ladder.
//!
//! Each tick takes one telemetry sample, records it in a bounded history and
//! classifies it into a pressure band. Only the highest matching band acts:
//! its configured actions run in order, and every action calls the hooks
//! registered for it. A failing hook is logged and skipped.

mod hooks;
mod ladder;
mod telemetry;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;

use crate::sync::lock;
use crate::ticker::Periodic;

pub use hooks::{MitigationError, MitigationHook};
pub use ladder::{BandActions, InvalidThresholds, MemoryThresholds, MitigationAction, PressureBand};
pub use telemetry::{ManualTelemetry, ResourceSample, SystemTelemetry, TelemetrySource};

/// Default number of samples kept.
pub const DEFAULT_HISTORY_SIZE: usize = 100;

#[derive(Debug, Default)]
struct MonitorCounters {
    samples: u64,
    sample_failures: u64,
    hook_failures: u64,
    actions_run: BTreeMap<MitigationAction, u64>,
    last_band: Option<PressureBand>,
}

/// Point-in-time view of the monitor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub latest: Option<ResourceSample>,
    pub band: Option<PressureBand>,
    pub thresholds: MemoryThresholds,
    pub history_len: usize,
    pub samples: u64,
    pub sample_failures: u64,
    pub hook_failures: u64,
    /// Keyed by action name.
    pub actions_run: BTreeMap<String, u64>,
}

pub struct ResourceMonitor {
    telemetry: Arc<dyn TelemetrySource>,
    thresholds: Mutex<MemoryThresholds>,
    actions: BandActions,
    history_size: usize,
    history: Mutex<VecDeque<ResourceSample>>,
    hooks: Mutex<HashMap<MitigationAction, Vec<Arc<dyn MitigationHook>>>>,
    counters: Mutex<MonitorCounters>,
}

impl ResourceMonitor {
    pub fn new(
        telemetry: Arc<dyn TelemetrySource>,
        thresholds: MemoryThresholds,
        actions: BandActions,
        history_size: usize,
    ) -> Self {
        let history_size = history_size.max(1);
        Self {
            telemetry,
            thresholds: Mutex::new(thresholds),
            actions,
            history_size,
            history: Mutex::new(VecDeque::with_capacity(history_size)),
            hooks: Mutex::new(HashMap::new()),
            counters: Mutex::new(MonitorCounters::default()),
        }
    }

    /// Add a hook to `action`. Hooks of one action run in registration order.
    pub fn register(&self, action: MitigationAction, hook: Arc<dyn MitigationHook>) {
        tracing::debug!(%action, hook = hook.name(), "mitigation hook registered");
        lock(&self.hooks).entry(action).or_default().push(hook);
    }

    /// Sample, classify and run the band's actions. Returns the band, or None
    /// if the sample failed.
    pub async fn tick(&self) -> Option<PressureBand> {
        let sample = match self.telemetry.sample() {
            Ok(sample) => sample,
            Err(e) => {
                lock(&self.counters).sample_failures += 1;
                tracing::warn!("memory sample failed: {:#}", e);
                return None;
            }
        };
        let percent = sample.memory_percent;
        let band = lock(&self.thresholds).classify(percent);
        self.record(sample, band);

        match band {
            PressureBand::Emergency => {
                tracing::warn!(memory_percent = percent, %band, "memory pressure, running emergency mitigation")
            }
            PressureBand::Critical | PressureBand::Warning => {
                tracing::warn!(memory_percent = percent, %band, "memory pressure, mitigating")
            }
            PressureBand::Normal | PressureBand::Idle => {
                tracing::debug!(memory_percent = percent, %band, "memory sample")
            }
        }
        self.run_ladder(band).await;
        Some(band)
    }

    /// Run every action configured for `band`, in order. Returns how many actions ran.
    pub async fn run_ladder(&self, band: PressureBand) -> usize {
        let actions = self.actions.for_band(band).to_vec();
        for action in &actions {
            self.run_action(*action).await;
        }
        actions.len()
    }

    /// Call every hook registered for `action`. Returns how many succeeded.
    pub async fn run_action(&self, action: MitigationAction) -> usize {
        let hooks = lock(&self.hooks).get(&action).cloned().unwrap_or_default();
        let mut ok = 0;
        for hook in hooks {
            match hook.run().await {
                Ok(()) => ok += 1,
                Err(e) => {
                    lock(&self.counters).hook_failures += 1;
                    tracing::error!(%action, "{}", e);
                }
            }
        }
        *lock(&self.counters).actions_run.entry(action).or_default() += 1;
        tracing::debug!(%action, hooks_ok = ok, "mitigation action done");
        ok
    }

    /// How many of `job_count` jobs, each expected to need
    /// `est_memory_per_job_mb`, fit in available memory.
    ///
    /// If they do not all fit, reclaim and cache-purge run first and memory is
    /// sampled again. Falls back to `job_count` when no sample is available.
    pub async fn plan_for_bulk(&self, job_count: usize, est_memory_per_job_mb: f64) -> usize {
        if job_count == 0 || !est_memory_per_job_mb.is_finite() || est_memory_per_job_mb <= 0.0 {
            return job_count;
        }
        let needed = job_count as f64 * est_memory_per_job_mb;
        let available = match self.telemetry.sample() {
            Ok(s) => s.available_memory_mb,
            Err(e) => {
                tracing::warn!("memory sample failed, not limiting bulk size: {:#}", e);
                return job_count;
            }
        };
        tracing::info!(
            job_count,
            needed_mb = needed,
            available_mb = available,
            "planning bulk run"
        );
        if needed <= available {
            return job_count;
        }

        self.run_action(MitigationAction::Reclaim).await;
        self.run_action(MitigationAction::CachePurge).await;
        let available = match self.telemetry.sample() {
            Ok(s) => s.available_memory_mb,
            Err(e) => {
                tracing::warn!("memory resample failed, not limiting bulk size: {:#}", e);
                return job_count;
            }
        };
        if needed <= available {
            return job_count;
        }
        let fits = ((available / est_memory_per_job_mb).floor().max(0.0) as usize).min(job_count);
        tracing::warn!(
            job_count,
            recommended = fits,
            available_mb = available,
            "bulk run does not fit in memory, split it"
        );
        fits
    }

    /// Samples, oldest first.
    pub fn history(&self) -> Vec<ResourceSample> {
        lock(&self.history).iter().cloned().collect()
    }

    pub fn thresholds(&self) -> MemoryThresholds {
        *lock(&self.thresholds)
    }

    pub fn set_thresholds(&self, thresholds: MemoryThresholds) -> Result<(), InvalidThresholds> {
        thresholds.validate()?;
        *lock(&self.thresholds) = thresholds;
        tracing::info!(?thresholds, "memory thresholds updated");
        Ok(())
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let (latest, history_len) = {
            let history = lock(&self.history);
            (history.back().cloned(), history.len())
        };
        let counters = lock(&self.counters);
        MonitorSnapshot {
            latest,
            band: counters.last_band,
            thresholds: self.thresholds(),
            history_len,
            samples: counters.samples,
            sample_failures: counters.sample_failures,
            hook_failures: counters.hook_failures,
            actions_run: counters
                .actions_run
                .iter()
                .map(|(a, n)| (a.as_str().to_string(), *n))
                .collect(),
        }
    }

    fn record(&self, sample: ResourceSample, band: PressureBand) {
        {
            let mut history = lock(&self.history);
            while history.len() >= self.history_size {
                history.pop_front();
            }
            history.push_back(sample);
        }
        let mut counters = lock(&self.counters);
        counters.samples += 1;
        counters.last_band = Some(band);
    }
}

#[async_trait]
impl Periodic for ResourceMonitor {
    async fn tick(&self) {
        ResourceMonitor::tick(self).await;
    }
}
