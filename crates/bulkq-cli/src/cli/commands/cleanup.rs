//! `bulkq cleanup <owner>` – remove finished jobs past their retention.

use anyhow::Result;

use crate::cli::StoreContext;

pub async fn run_cleanup(
    ctx: &StoreContext,
    owner: &str,
    max_age_hours: Option<u64>,
) -> Result<()> {
    let hours = max_age_hours.unwrap_or(ctx.cfg.retention_hours);
    let removed = ctx.state.cleanup_terminal(owner, hours).await?;
    println!("Removed {removed} finished job(s) older than {hours}h for {owner}");
    Ok(())
}
