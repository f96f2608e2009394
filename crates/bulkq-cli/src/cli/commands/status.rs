//! `bulkq status` – per-owner job counts, or one owner's jobs.

use anyhow::Result;
use bulkq_core::job::JobRecord;

use crate::cli::StoreContext;

pub async fn run_status(ctx: &StoreContext, owner: Option<&str>) -> Result<()> {
    match owner {
        Some(owner) => print_owner_jobs(&ctx.state.get_owner_jobs(owner).await?),
        None => {
            let counts = ctx.store.job_counts().await?;
            if counts.is_empty() {
                println!("No jobs in database.");
                return Ok(());
            }
            println!("{:<24} {}", "OWNER", "JOBS");
            for (owner, n) in counts {
                println!("{:<24} {}", owner, n);
            }
        }
    }
    Ok(())
}

fn print_owner_jobs(jobs: &[JobRecord]) {
    if jobs.is_empty() {
        println!("No jobs for this owner.");
        return;
    }
    println!(
        "{:<24} {:<10} {:>7} {:>12} {:>10}",
        "JOB", "STATE", "PCT", "CURSOR", "PROCESSED"
    );
    for j in jobs {
        let cursor = j
            .cursor
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<10} {:>6.1}% {:>12} {:>10}",
            j.job_id, j.status, j.progress_percent, cursor, j.counters.processed
        );
    }
}
