//! Pressure bands and the actions each band triggers.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Memory pressure classification, low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureBand {
    /// At or below the idle threshold: housekeeping only.
    Idle,
    Normal,
    Warning,
    Critical,
    Emergency,
}

impl PressureBand {
    pub fn as_str(self) -> &'static str {
        match self {
            PressureBand::Idle => "idle",
            PressureBand::Normal => "normal",
            PressureBand::Warning => "warning",
            PressureBand::Critical => "critical",
            PressureBand::Emergency => "emergency",
        }
    }
}

impl fmt::Display for PressureBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid memory thresholds: need idle < warning <= critical <= emergency <= 100, got {idle}/{warning}/{critical}/{emergency}")]
pub struct InvalidThresholds {
    pub idle: f64,
    pub warning: f64,
    pub critical: f64,
    pub emergency: f64,
}

/// Band boundaries, in percent of system memory in use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryThresholds {
    pub warning: f64,
    pub critical: f64,
    pub emergency: f64,
    pub idle: f64,
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            warning: 70.0,
            critical: 85.0,
            emergency: 95.0,
            idle: 60.0,
        }
    }
}

impl MemoryThresholds {
    /// Highest band whose threshold `memory_percent` reaches.
    pub fn classify(&self, memory_percent: f64) -> PressureBand {
        if memory_percent >= self.emergency {
            PressureBand::Emergency
        } else if memory_percent >= self.critical {
            PressureBand::Critical
        } else if memory_percent >= self.warning {
            PressureBand::Warning
        } else if memory_percent <= self.idle {
            PressureBand::Idle
        } else {
            PressureBand::Normal
        }
    }

    pub fn validate(&self) -> Result<(), InvalidThresholds> {
        let ordered = self.idle < self.warning
            && self.warning <= self.critical
            && self.critical <= self.emergency
            && self.emergency <= 100.0
            && self.idle >= 0.0;
        if ordered {
            Ok(())
        } else {
            Err(InvalidThresholds {
                idle: self.idle,
                warning: self.warning,
                critical: self.critical,
                emergency: self.emergency,
            })
        }
    }
}

/// One rung of the mitigation ladder. Each action runs every hook registered for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MitigationAction {
    /// Give back spare memory held by internal structures.
    Reclaim,
    /// Drop cached data that can be reloaded.
    CachePurge,
    /// Pause running Low and Normal priority jobs.
    PauseLowPriority,
    /// Flush and drop everything not needed by active jobs.
    FullSweep,
}

impl MitigationAction {
    pub const ALL: [MitigationAction; 4] = [
        MitigationAction::Reclaim,
        MitigationAction::CachePurge,
        MitigationAction::PauseLowPriority,
        MitigationAction::FullSweep,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MitigationAction::Reclaim => "reclaim",
            MitigationAction::CachePurge => "cache-purge",
            MitigationAction::PauseLowPriority => "pause-low-priority",
            MitigationAction::FullSweep => "full-sweep",
        }
    }
}

impl fmt::Display for MitigationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions run, in order, for each band. Normal runs nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandActions {
    pub idle: Vec<MitigationAction>,
    pub warning: Vec<MitigationAction>,
    pub critical: Vec<MitigationAction>,
    pub emergency: Vec<MitigationAction>,
}

impl Default for BandActions {
    fn default() -> Self {
        use MitigationAction::*;
        Self {
            idle: vec![Reclaim],
            warning: vec![Reclaim, CachePurge],
            critical: vec![Reclaim, CachePurge, PauseLowPriority],
            emergency: vec![Reclaim, CachePurge, PauseLowPriority, FullSweep],
        }
    }
}

impl BandActions {
    pub fn for_band(&self, band: PressureBand) -> &[MitigationAction] {
        match band {
            PressureBand::Idle => &self.idle,
            PressureBand::Normal => &[],
            PressureBand::Warning => &self.warning,
            PressureBand::Critical => &self.critical,
            PressureBand::Emergency => &self.emergency,
        }
    }
}
