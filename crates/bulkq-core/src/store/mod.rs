//! Durable job record store.
//!
//! Records are grouped into one document per owner: the backend is expected
//! to be a quota-limited document store where writing an owner's whole job
//! set at once is cheaper than one write per job. There is no index by job id,
//! so an id-only lookup has to enumerate owners (see `StateCache::get`).

mod memory;
mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::job::JobRecord;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

/// One owner's jobs, keyed by job id.
pub type OwnerJobs = BTreeMap<String, JobRecord>;

/// Get/set interface to the backing document store.
#[async_trait]
pub trait JobRecordStore: Send + Sync {
    /// All jobs stored for `owner_id` (empty if the owner has no document).
    async fn get_owner_jobs(&self, owner_id: &str) -> Result<OwnerJobs, StoreError>;

    /// Replace the owner's whole job set. An empty map removes the document.
    async fn put_owner_jobs(&self, owner_id: &str, jobs: &OwnerJobs) -> Result<(), StoreError>;

    /// Owners that currently have a document.
    async fn list_owners(&self) -> Result<Vec<String>, StoreError>;
}
