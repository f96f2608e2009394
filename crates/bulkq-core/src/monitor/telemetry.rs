//! Memory and CPU samples, from the host (sysinfo) or injected by hand.

use std::sync::Mutex;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::System;

use crate::sync::lock;

const MB: f64 = 1024.0 * 1024.0;

/// One telemetry reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSample {
    pub taken_at: DateTime<Utc>,
    /// System memory in use, percent of total.
    pub memory_percent: f64,
    pub total_memory_mb: f64,
    pub available_memory_mb: f64,
    /// Resident set size of this process.
    pub process_rss_mb: f64,
    /// Global CPU usage, percent.
    pub cpu_percent: f64,
}

impl ResourceSample {
    /// Sample of a 16 GiB host at the given memory and CPU load.
    pub fn synthetic(memory_percent: f64, cpu_percent: f64) -> Self {
        let total = 16_384.0;
        let memory_percent = memory_percent.clamp(0.0, 100.0);
        Self {
            taken_at: Utc::now(),
            memory_percent,
            total_memory_mb: total,
            available_memory_mb: total * (100.0 - memory_percent) / 100.0,
            process_rss_mb: 0.0,
            cpu_percent,
        }
    }

    pub fn used_memory_mb(&self) -> f64 {
        (self.total_memory_mb - self.available_memory_mb).max(0.0)
    }
}

/// Where the scheduler and monitor get their readings.
pub trait TelemetrySource: Send + Sync {
    fn sample(&self) -> Result<ResourceSample>;
}

/// Host telemetry through `sysinfo`.
pub struct SystemTelemetry {
    sys: Mutex<System>,
    pid: Option<sysinfo::Pid>,
}

impl SystemTelemetry {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                tracing::warn!("current pid unavailable, process RSS will read 0: {}", e);
                None
            }
        };
        let mut sys = System::new();
        // CPU usage is a delta between two refreshes; prime the first one.
        sys.refresh_cpu();
        Self {
            sys: Mutex::new(sys),
            pid,
        }
    }
}

impl Default for SystemTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySource for SystemTelemetry {
    fn sample(&self) -> Result<ResourceSample> {
        let mut sys = lock(&self.sys);
        sys.refresh_memory();
        sys.refresh_cpu();

        let total = sys.total_memory() as f64;
        if total <= 0.0 {
            return Err(anyhow!("host reported zero total memory"));
        }
        let available = sys.available_memory() as f64;

        let mut rss = 0.0;
        if let Some(pid) = self.pid {
            if sys.refresh_process(pid) {
                if let Some(process) = sys.process(pid) {
                    rss = process.memory() as f64;
                }
            }
        }

        Ok(ResourceSample {
            taken_at: Utc::now(),
            memory_percent: ((total - available) / total * 100.0).clamp(0.0, 100.0),
            total_memory_mb: total / MB,
            available_memory_mb: available / MB,
            process_rss_mb: rss / MB,
            cpu_percent: f64::from(sys.global_cpu_info().cpu_usage()),
        })
    }
}

/// Telemetry with injected values, for tests and dry runs.
#[derive(Debug)]
pub struct ManualTelemetry {
    next: Mutex<Option<ResourceSample>>,
}

impl ManualTelemetry {
    pub fn new(sample: ResourceSample) -> Self {
        Self {
            next: Mutex::new(Some(sample)),
        }
    }

    /// Source whose every read fails.
    pub fn unavailable() -> Self {
        Self {
            next: Mutex::new(None),
        }
    }

    pub fn set(&self, sample: ResourceSample) {
        *lock(&self.next) = Some(sample);
    }

    pub fn set_memory_percent(&self, percent: f64) {
        let mut next = lock(&self.next);
        let cpu = next.as_ref().map_or(0.0, |s| s.cpu_percent);
        *next = Some(ResourceSample::synthetic(percent, cpu));
    }

    pub fn set_unavailable(&self) {
        *lock(&self.next) = None;
    }
}

impl TelemetrySource for ManualTelemetry {
    fn sample(&self) -> Result<ResourceSample> {
        lock(&self.next)
            .clone()
            .map(|mut s| {
                s.taken_at = Utc::now();
                s
            })
            .ok_or_else(|| anyhow!("telemetry source unavailable"))
    }
}
