//! Admission limits: global and per-owner concurrency, memory and CPU ceilings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitor::ResourceSample;

/// Limits checked before each dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionLimits {
    pub max_concurrent_global: usize,
    pub max_concurrent_per_owner: usize,
    /// Dispatch stops once projected memory use reaches this percent.
    pub memory_ceiling_percent: f64,
    pub cpu_ceiling_percent: f64,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            max_concurrent_global: 10,
            max_concurrent_per_owner: 5,
            memory_ceiling_percent: 80.0,
            cpu_ceiling_percent: 80.0,
        }
    }
}

/// Why a tick stopped admitting. An outcome, not a failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdmissionDenied {
    #[error("global concurrency limit reached ({running}/{limit})")]
    GlobalLimit { running: usize, limit: usize },
    #[error("projected memory {projected_percent:.1}% at or above ceiling {ceiling_percent:.1}%")]
    MemoryCeiling {
        projected_percent: f64,
        ceiling_percent: f64,
    },
    #[error("cpu {cpu_percent:.1}% at or above ceiling {ceiling_percent:.1}%")]
    CpuCeiling {
        cpu_percent: f64,
        ceiling_percent: f64,
    },
    #[error("owner {owner_id} already runs {running} jobs (limit {limit})")]
    OwnerLimit {
        owner_id: String,
        running: usize,
        limit: usize,
    },
    #[error("telemetry unavailable: {0}")]
    TelemetryUnavailable(String),
}

/// Memory picture for one tick: the sample plus what this tick already dispatched.
#[derive(Debug, Clone)]
pub(crate) struct ProjectedLoad {
    total_memory_mb: f64,
    used_memory_mb: f64,
    reserved_mb: u64,
    cpu_percent: f64,
}

impl ProjectedLoad {
    pub(crate) fn from_sample(sample: &ResourceSample) -> Self {
        Self {
            total_memory_mb: sample.total_memory_mb,
            used_memory_mb: sample.used_memory_mb(),
            reserved_mb: 0,
            cpu_percent: sample.cpu_percent,
        }
    }

    pub(crate) fn reserve(&mut self, memory_mb: u64) {
        self.reserved_mb = self.reserved_mb.saturating_add(memory_mb);
    }

    pub(crate) fn memory_percent(&self) -> f64 {
        if self.total_memory_mb <= 0.0 {
            return 100.0;
        }
        (self.used_memory_mb + self.reserved_mb as f64) / self.total_memory_mb * 100.0
    }
}

impl AdmissionLimits {
    /// Global part of the admission test.
    pub(crate) fn check_global(
        &self,
        running: usize,
        load: &ProjectedLoad,
    ) -> Result<(), AdmissionDenied> {
        if running >= self.max_concurrent_global {
            return Err(AdmissionDenied::GlobalLimit {
                running,
                limit: self.max_concurrent_global,
            });
        }
        let projected = load.memory_percent();
        if projected >= self.memory_ceiling_percent {
            return Err(AdmissionDenied::MemoryCeiling {
                projected_percent: projected,
                ceiling_percent: self.memory_ceiling_percent,
            });
        }
        if load.cpu_percent >= self.cpu_ceiling_percent {
            return Err(AdmissionDenied::CpuCeiling {
                cpu_percent: load.cpu_percent,
                ceiling_percent: self.cpu_ceiling_percent,
            });
        }
        Ok(())
    }

    pub(crate) fn check_owner(&self, owner_id: &str, running: usize) -> Result<(), AdmissionDenied> {
        if running >= self.max_concurrent_per_owner {
            return Err(AdmissionDenied::OwnerLimit {
                owner_id: owner_id.to_string(),
                running,
                limit: self.max_concurrent_per_owner,
            });
        }
        Ok(())
    }
}
