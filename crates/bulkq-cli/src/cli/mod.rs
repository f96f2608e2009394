//! CLI for the bulkq job store and resource monitor.
//!
//! Job commands work offline against the durable store and write through
//! at once. A running service does not overwrite a pause or cancel stored
//! here; it adopts it, and a cancelled job's slot is released on its next
//! admission tick. `resume` takes effect at the service's next recovery.

mod commands;

use std::sync::Arc;

use anyhow::Result;
use bulkq_core::config::{self, BulkqConfig};
use bulkq_core::state::StateCache;
use bulkq_core::store::{JobRecordStore, SqliteJobStore};
use clap::{Parser, Subcommand};

use commands::{
    run_cancel, run_cleanup, run_pause, run_plan, run_resume, run_sample, run_show, run_status,
};

/// Top-level CLI for bulkq.
#[derive(Debug, Parser)]
#[command(name = "bulkq")]
#[command(about = "bulkq: admission, checkpointing and memory mitigation for bulk jobs", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Show job counts per owner, or one owner's jobs.
    Status {
        /// List this owner's jobs instead of the per-owner summary.
        #[arg(long)]
        owner: Option<String>,
    },

    /// Print one job record as JSON.
    Show {
        /// Job identifier.
        job_id: String,
    },

    /// Mark a running job as paused. A running service adopts the pause.
    Pause {
        /// Job identifier.
        job_id: String,
    },

    /// Mark a paused job as running so the next recovery requeues it.
    Resume {
        /// Job identifier.
        job_id: String,
    },

    /// Cancel a job that has not finished. A running service releases its slot.
    Cancel {
        /// Job identifier.
        job_id: String,
    },

    /// Remove an owner's finished jobs older than the retention period.
    Cleanup {
        /// Owner whose jobs are cleaned up.
        owner: String,
        /// Override the configured retention (hours).
        #[arg(long, value_name = "N")]
        max_age_hours: Option<u64>,
    },

    /// How many of N jobs can start now without exceeding the memory budget.
    Plan {
        /// Number of jobs in the bulk run.
        #[arg(long, value_name = "N")]
        jobs: usize,
        /// Estimated memory per job, in MB.
        #[arg(long, value_name = "MB", default_value = "100")]
        mem_per_job: f64,
    },

    /// Take one host resource sample and classify it.
    Sample,
}

/// Config plus a cache over the default SQLite store.
pub(crate) struct StoreContext {
    pub cfg: BulkqConfig,
    pub store: Arc<SqliteJobStore>,
    pub state: StateCache,
}

impl StoreContext {
    async fn open(cfg: BulkqConfig) -> Result<Self> {
        let store = Arc::new(SqliteJobStore::open_default().await?);
        let state = StateCache::new(
            Arc::clone(&store) as Arc<dyn JobRecordStore>,
            cfg.write_back.batch_save_size,
        );
        Ok(Self { cfg, store, state })
    }
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Plan { jobs, mem_per_job } => run_plan(&cfg, jobs, mem_per_job).await?,
            CliCommand::Sample => run_sample(&cfg)?,
            command => {
                let ctx = StoreContext::open(cfg).await?;
                match command {
                    CliCommand::Status { owner } => run_status(&ctx, owner.as_deref()).await?,
                    CliCommand::Show { job_id } => run_show(&ctx, &job_id).await?,
                    CliCommand::Pause { job_id } => run_pause(&ctx, &job_id).await?,
                    CliCommand::Resume { job_id } => run_resume(&ctx, &job_id).await?,
                    CliCommand::Cancel { job_id } => run_cancel(&ctx, &job_id).await?,
                    CliCommand::Cleanup {
                        owner,
                        max_age_hours,
                    } => run_cleanup(&ctx, &owner, max_age_hours).await?,
                    CliCommand::Plan { .. } | CliCommand::Sample => {}
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
