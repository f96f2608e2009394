//! Process-local job record store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::sync::lock;

use super::{JobRecordStore, OwnerJobs};

/// In-memory store. Useful for embedding without a database and in tests;
/// it counts reads and writes so callers can observe backend I/O.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    owners: Mutex<BTreeMap<String, OwnerJobs>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get_owner_jobs` calls served.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of `put_owner_jobs` calls served.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Copy of everything stored, keyed by owner.
    pub fn snapshot(&self) -> BTreeMap<String, OwnerJobs> {
        lock(&self.owners).clone()
    }
}

#[async_trait]
impl JobRecordStore for MemoryJobStore {
    async fn get_owner_jobs(&self, owner_id: &str) -> Result<OwnerJobs, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(lock(&self.owners)
            .get(owner_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_owner_jobs(&self, owner_id: &str, jobs: &OwnerJobs) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut owners = lock(&self.owners);
        if jobs.is_empty() {
            owners.remove(owner_id);
        } else {
            owners.insert(owner_id.to_string(), jobs.clone());
        }
        Ok(())
    }

    async fn list_owners(&self) -> Result<Vec<String>, StoreError> {
        Ok(lock(&self.owners).keys().cloned().collect())
    }
}
