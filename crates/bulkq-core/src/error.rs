//! Error types for the job store and the state cache.
//!
//! Admission refusals (`scheduler::AdmissionDenied`) and hook failures
//! (`monitor::MitigationError`) live next to the code that produces them.

use thiserror::Error;

use crate::job::JobStatus;

/// Failure talking to the durable job record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite (or other sqlx backend) error.
    #[error("store backend: {0}")]
    Backend(#[from] sqlx::Error),
    /// A stored owner document could not be encoded or decoded.
    #[error("job record codec: {0}")]
    Codec(#[from] serde_json::Error),
    /// Backend refused the request (quota exhausted, offline, ...).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by `StateCache` operations.
///
/// Unknown job ids are not errors: lookups return `None` / `false`.
#[derive(Debug, Error)]
pub enum StateError {
    /// Reading or writing an owner's job document failed. The cached record
    /// stays dirty and is retried by the next flush.
    #[error("persist jobs for owner {owner_id}: {source}")]
    Persistence {
        owner_id: String,
        #[source]
        source: StoreError,
    },
    /// The requested status change is not an edge of the job lifecycle.
    #[error("job {job_id}: invalid status transition {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
    /// processed + failed + skipped would exceed the known total.
    #[error("job {job_id}: {accounted} items accounted for but total is {total}")]
    CounterOverflow {
        job_id: String,
        accounted: u64,
        total: u64,
    },
    /// The job already ended; its record no longer changes.
    #[error("job {job_id} is {status}, its record is final")]
    Finished { job_id: String, status: JobStatus },
    /// A job with this id is already cached or stored.
    #[error("job {0} already exists")]
    AlreadyExists(String),
}

impl StateError {
    pub(crate) fn persistence(owner_id: &str, source: StoreError) -> Self {
        StateError::Persistence {
            owner_id: owner_id.to_string(),
            source,
        }
    }
}
