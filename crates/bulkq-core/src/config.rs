use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::monitor::{BandActions, MemoryThresholds, DEFAULT_HISTORY_SIZE};
use crate::scheduler::AdmissionLimits;
use crate::state::{DEFAULT_BATCH_SAVE_SIZE, DEFAULT_RETENTION_HOURS};

/// `[scheduler]`: admission cadence and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between admission ticks.
    pub interval_secs: u64,
    pub max_concurrent_global: usize,
    pub max_concurrent_per_owner: usize,
    pub memory_ceiling_percent: f64,
    pub cpu_ceiling_percent: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let limits = AdmissionLimits::default();
        Self {
            interval_secs: 5,
            max_concurrent_global: limits.max_concurrent_global,
            max_concurrent_per_owner: limits.max_concurrent_per_owner,
            memory_ceiling_percent: limits.memory_ceiling_percent,
            cpu_ceiling_percent: limits.cpu_ceiling_percent,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn limits(&self) -> AdmissionLimits {
        AdmissionLimits {
            max_concurrent_global: self.max_concurrent_global,
            max_concurrent_per_owner: self.max_concurrent_per_owner,
            memory_ceiling_percent: self.memory_ceiling_percent,
            cpu_ceiling_percent: self.cpu_ceiling_percent,
        }
    }
}

/// `[write_back]`: how often and in what batches dirty job records are saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteBackConfig {
    pub save_interval_secs: u64,
    pub batch_save_size: usize,
}

impl Default for WriteBackConfig {
    fn default() -> Self {
        Self {
            save_interval_secs: 30,
            batch_save_size: DEFAULT_BATCH_SAVE_SIZE,
        }
    }
}

impl WriteBackConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs.max(1))
    }
}

/// `[monitor]`: sampling cadence, band thresholds and per-band actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    pub history_size: usize,
    pub thresholds: MemoryThresholds,
    pub actions: BandActions,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            history_size: DEFAULT_HISTORY_SIZE,
            thresholds: MemoryThresholds::default(),
            actions: BandActions::default(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Global configuration loaded from `~/.config/bulkq/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkqConfig {
    /// Hours a finished job is kept before `cleanup` removes it.
    pub retention_hours: u64,
    pub scheduler: SchedulerConfig,
    pub write_back: WriteBackConfig,
    pub monitor: MonitorConfig,
}

impl Default for BulkqConfig {
    fn default() -> Self {
        Self {
            retention_hours: DEFAULT_RETENTION_HOURS,
            scheduler: SchedulerConfig::default(),
            write_back: WriteBackConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl BulkqConfig {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent_global == 0 {
            bail!("scheduler.max_concurrent_global must be at least 1");
        }
        if self.scheduler.max_concurrent_per_owner == 0 {
            bail!("scheduler.max_concurrent_per_owner must be at least 1");
        }
        if self.write_back.batch_save_size == 0 {
            bail!("write_back.batch_save_size must be at least 1");
        }
        self.monitor.thresholds.validate()?;
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("bulkq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<BulkqConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = BulkqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from(&path)
}

/// Load and validate configuration from an explicit file.
pub fn load_from(path: &Path) -> Result<BulkqConfig> {
    let data = fs::read_to_string(path)?;
    let cfg: BulkqConfig = toml::from_str(&data)?;
    cfg.validate()?;
    Ok(cfg)
}
