//! Priority queues of jobs waiting for admission.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Admission priority. Higher runs first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl Priority {
    /// Dispatch order.
    pub const DESCENDING: [Priority; 4] = [
        Priority::Urgent,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    /// Running jobs at this priority are paused under memory pressure.
    pub fn yields_under_pressure(self) -> bool {
        matches!(self, Priority::Low | Priority::Normal)
    }

    fn lane(self) -> usize {
        match self {
            Priority::Urgent => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Expected footprint of one job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceEstimate {
    pub memory_mb: u64,
    pub cpu_percent: f64,
    pub concurrency_slots: u32,
}

impl Default for ResourceEstimate {
    fn default() -> Self {
        Self {
            memory_mb: 100,
            cpu_percent: 10.0,
            concurrency_slots: 1,
        }
    }
}

/// A job waiting in (or dispatched from) a priority queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub job_id: String,
    pub owner_id: String,
    pub priority: Priority,
    pub resource: ResourceEstimate,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub estimated_duration: Option<Duration>,
}

impl QueueEntry {
    pub fn new(job_id: impl Into<String>, owner_id: impl Into<String>, priority: Priority) -> Self {
        Self {
            job_id: job_id.into(),
            owner_id: owner_id.into(),
            priority,
            resource: ResourceEstimate::default(),
            enqueued_at: Utc::now(),
            started_at: None,
            estimated_duration: None,
        }
    }

    pub fn with_resource(mut self, resource: ResourceEstimate) -> Self {
        self.resource = resource;
        self
    }

    pub fn with_estimated_duration(mut self, d: Duration) -> Self {
        self.estimated_duration = Some(d);
        self
    }
}

/// One FIFO lane per priority.
#[derive(Debug, Default)]
pub(crate) struct PriorityQueues {
    lanes: [VecDeque<QueueEntry>; 4],
}

impl PriorityQueues {
    pub(crate) fn push(&mut self, entry: QueueEntry) {
        self.lanes[entry.priority.lane()].push_back(entry);
    }

    pub(crate) fn contains(&self, job_id: &str) -> bool {
        self.find(job_id).is_some()
    }

    pub(crate) fn priority_of(&self, job_id: &str) -> Option<Priority> {
        self.find(job_id).map(|e| e.priority)
    }

    /// O(n) scan of every lane.
    pub(crate) fn remove(&mut self, job_id: &str) -> Option<QueueEntry> {
        for lane in &mut self.lanes {
            if let Some(pos) = lane.iter().position(|e| e.job_id == job_id) {
                return lane.remove(pos);
            }
        }
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }

    pub(crate) fn len_of(&self, priority: Priority) -> usize {
        self.lanes[priority.lane()].len()
    }

    /// Pop the oldest entry of the highest priority that is not blocked.
    ///
    /// Blocked entries go to the tail of their lane. Each entry is looked at
    /// most once per call, so a lane where everything is blocked keeps its
    /// order and the call moves on to the next priority.
    pub(crate) fn next_eligible(
        &mut self,
        mut is_blocked: impl FnMut(&QueueEntry) -> bool,
    ) -> Option<QueueEntry> {
        for lane in &mut self.lanes {
            for _ in 0..lane.len() {
                let entry = lane.pop_front()?;
                if is_blocked(&entry) {
                    lane.push_back(entry);
                } else {
                    return Some(entry);
                }
            }
        }
        None
    }

    fn find(&self, job_id: &str) -> Option<&QueueEntry> {
        self.lanes.iter().flatten().find(|e| e.job_id == job_id)
    }
}
