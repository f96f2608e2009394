//! `bulkq sample` – one host resource sample and its pressure band.

use anyhow::Result;
use bulkq_core::config::BulkqConfig;
use bulkq_core::monitor::{SystemTelemetry, TelemetrySource};

pub fn run_sample(cfg: &BulkqConfig) -> Result<()> {
    let sample = SystemTelemetry::new().sample()?;
    let band = cfg.monitor.thresholds.classify(sample.memory_percent);
    println!("memory     {:>6.1}%  ({})", sample.memory_percent, band.as_str());
    println!(
        "available  {:>8.0} MB of {:.0} MB",
        sample.available_memory_mb, sample.total_memory_mb
    );
    println!("process    {:>8.1} MB", sample.process_rss_mb);
    println!("cpu        {:>6.1}%", sample.cpu_percent);
    Ok(())
}
