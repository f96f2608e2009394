use anyhow::Result;

/// Runs the actual work of a dispatched job.
///
/// Cancellation and pause are cooperative: the executor polls the job status
/// (e.g. `StateCache::status`) and stops at its next check point.
pub trait JobExecutor: Send + Sync {
    /// Begin work on `job_id`. Must return promptly; long-running work belongs
    /// on a spawned task. An error is logged and the job stays Running until
    /// the executor reports an outcome.
    fn start(&self, job_id: &str) -> Result<()>;

    /// Most items processed between two status polls. Bounds how long a
    /// cancel or pause can go unnoticed.
    fn status_check_granularity(&self) -> usize {
        1
    }
}

impl<F> JobExecutor for F
where
    F: Fn(&str) -> Result<()> + Send + Sync,
{
    fn start(&self, job_id: &str) -> Result<()> {
        self(job_id)
    }
}
