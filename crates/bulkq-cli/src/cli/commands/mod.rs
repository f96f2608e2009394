//! CLI command handlers, one file per command.

mod cancel;
mod cleanup;
mod pause;
mod plan;
mod resume;
mod sample;
mod show;
mod status;

pub use cancel::run_cancel;
pub use cleanup::run_cleanup;
pub use pause::run_pause;
pub use plan::run_plan;
pub use resume::run_resume;
pub use sample::run_sample;
pub use show::run_show;
pub use status::run_status;

use anyhow::{bail, Result};
use bulkq_core::job::{JobStatus, JobUpdate};

use crate::cli::StoreContext;

/// Move `job_id` to `status` and write it through to the store.
async fn set_status(ctx: &StoreContext, job_id: &str, status: JobStatus) -> Result<()> {
    if !ctx
        .state
        .update(job_id, JobUpdate::new().status(status))
        .await?
    {
        bail!("no job {job_id}");
    }
    if !ctx.state.flush_now(job_id).await {
        bail!("job {job_id} marked {status} but the store write failed");
    }
    Ok(())
}
