use std::collections::HashMap;

use super::queue::{Priority, QueueEntry};

/// Dispatched jobs, with a per-owner count kept in step.
///
/// Paused jobs stay here: they keep their slot until they reach a terminal state.
#[derive(Debug, Default)]
pub(crate) struct RunningSet {
    entries: HashMap<String, QueueEntry>,
    per_owner: HashMap<String, usize>,
}

impl RunningSet {
    pub(crate) fn insert(&mut self, entry: QueueEntry) {
        *self.per_owner.entry(entry.owner_id.clone()).or_default() += 1;
        if let Some(old) = self.entries.insert(entry.job_id.clone(), entry) {
            self.release_owner(&old.owner_id);
        }
    }

    pub(crate) fn remove(&mut self, job_id: &str) -> Option<QueueEntry> {
        let entry = self.entries.remove(job_id)?;
        self.release_owner(&entry.owner_id);
        Some(entry)
    }

    pub(crate) fn contains(&self, job_id: &str) -> bool {
        self.entries.contains_key(job_id)
    }

    pub(crate) fn get(&self, job_id: &str) -> Option<&QueueEntry> {
        self.entries.get(job_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn owner_count(&self, owner_id: &str) -> usize {
        self.per_owner.get(owner_id).copied().unwrap_or(0)
    }

    pub(crate) fn per_owner(&self) -> &HashMap<String, usize> {
        &self.per_owner
    }

    pub(crate) fn job_ids(&self) -> Vec<(String, Priority)> {
        let mut ids: Vec<_> = self
            .entries
            .values()
            .map(|e| (e.job_id.clone(), e.priority))
            .collect();
        ids.sort();
        ids
    }

    fn release_owner(&mut self, owner_id: &str) {
        if let Some(n) = self.per_owner.get_mut(owner_id) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                self.per_owner.remove(owner_id);
            }
        }
    }
}
