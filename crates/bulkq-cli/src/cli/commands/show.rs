//! `bulkq show <job_id>` – print one job record.

use anyhow::{bail, Result};

use crate::cli::StoreContext;

pub async fn run_show(ctx: &StoreContext, job_id: &str) -> Result<()> {
    let Some(record) = ctx.state.get(job_id).await else {
        bail!("no job {job_id}");
    };
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
