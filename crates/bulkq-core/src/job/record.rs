//! Job record, counters, and the field-update type used by executors.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StateError;

use super::JobStatus;

/// Transfer parameters captured when a job is registered.
///
/// Stored with the record so a resumed job knows what it was doing; the
/// scheduler never looks inside.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_position: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_position: Option<i64>,
    /// Executor-specific settings.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, Value>,
}

/// Item counters reported by the executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobCounters {
    /// Unknown until the executor has sized the range.
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub skipped: u64,
    /// Executor-defined statistics (media items, filtered items, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl JobCounters {
    /// Items with an outcome: processed + failed + skipped.
    pub fn accounted(&self) -> u64 {
        self.processed
            .saturating_add(self.failed)
            .saturating_add(self.skipped)
    }

    /// Fraction of `total` accounted for, in [0, 100]. None while total is unknown.
    pub fn completion_percent(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(100.0),
            Some(total) => Some((self.accounted() as f64 / total as f64 * 100.0).min(100.0)),
            None => None,
        }
    }
}

/// Durable record of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub owner_id: String,
    pub status: JobStatus,
    pub progress_percent: f64,
    /// Last successfully processed position; the executor resumes after it.
    pub cursor: Option<i64>,
    #[serde(default)]
    pub counters: JobCounters,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Set when the record was reloaded from the store instead of created here.
    #[serde(default)]
    pub resumed: bool,
    #[serde(default)]
    pub config: JobConfig,
}

impl JobRecord {
    /// Fresh Pending record.
    pub fn new(
        job_id: impl Into<String>,
        owner_id: impl Into<String>,
        cursor_start: Option<i64>,
        config: JobConfig,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            owner_id: owner_id.into(),
            status: JobStatus::Pending,
            progress_percent: 0.0,
            cursor: cursor_start,
            counters: JobCounters::default(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            error_message: None,
            resumed: false,
            config,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when an executor should stop at its next check point.
    pub fn should_stop(&self) -> bool {
        matches!(self.status, JobStatus::Paused | JobStatus::Cancelled)
    }

    /// Terminal and ended more than `max_age` before `now`.
    pub fn expired(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.is_terminal() && self.ended_at.is_some_and(|end| now - end > max_age)
    }

    /// Whether `stored` holds a stop (Paused or terminal) written by someone
    /// other than the holder of `self`, whose last write or read of the
    /// record saw `last_stored`. Only stops `self` could still move to count.
    pub(crate) fn stopped_elsewhere(
        &self,
        last_stored: Option<JobStatus>,
        stored: &JobRecord,
    ) -> bool {
        let stop = stored.status == JobStatus::Paused || stored.status.is_terminal();
        stop && stored.status != self.status
            && Some(stored.status) != last_stored
            && self.status.can_transition_to(stored.status)
    }

    /// Take the status of `stored` and the fields that come with it,
    /// keeping this record's progress.
    pub(crate) fn take_stop(&mut self, stored: &JobRecord) {
        self.status = stored.status;
        self.ended_at = stored.ended_at;
        if stored.status == JobStatus::Failed {
            self.error_message = stored.error_message.clone();
        }
    }

    /// Merge `update` into the record.
    ///
    /// Nothing is modified when the update is rejected. Returns the
    /// `(from, to)` pair when the status actually changed. Entering Running for
    /// the first time stamps `started_at`; entering a terminal state stamps
    /// `ended_at`. `error_message` is only kept when the job ends Failed.
    /// A terminal record only accepts updates that change nothing.
    pub(crate) fn apply(
        &mut self,
        update: &JobUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<(JobStatus, JobStatus)>, StateError> {
        let next = update.status.unwrap_or(self.status);
        if !self.status.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                job_id: self.job_id.clone(),
                from: self.status,
                to: next,
            });
        }
        if self.is_terminal() {
            if update.is_status_only() {
                return Ok(None);
            }
            return Err(StateError::Finished {
                job_id: self.job_id.clone(),
                status: self.status,
            });
        }

        let mut counters = self.counters.clone();
        if let Some(total) = update.total {
            counters.total = Some(total);
        }
        if let Some(n) = update.processed {
            counters.processed = n;
        }
        if let Some(n) = update.failed {
            counters.failed = n;
        }
        if let Some(n) = update.skipped {
            counters.skipped = n;
        }
        for (key, value) in &update.extra {
            counters.extra.insert(key.clone(), value.clone());
        }
        if let Some(total) = counters.total {
            let accounted = counters.accounted();
            if accounted > total {
                return Err(StateError::CounterOverflow {
                    job_id: self.job_id.clone(),
                    accounted,
                    total,
                });
            }
        }

        self.counters = counters;
        if let Some(p) = update.progress_percent.filter(|p| p.is_finite()) {
            self.progress_percent = p.clamp(0.0, 100.0);
        }
        if let Some(cursor) = update.cursor {
            self.cursor = Some(cursor);
        }
        if next == JobStatus::Failed {
            if let Some(msg) = &update.error_message {
                self.error_message = Some(msg.clone());
            }
        }

        if next == self.status {
            return Ok(None);
        }
        let from = self.status;
        if next == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        self.status = next;
        Ok(Some((from, next)))
    }
}

/// Partial update of a job record. Unset fields are left untouched.
///
/// ```
/// use bulkq_core::job::{JobStatus, JobUpdate};
///
/// let update = JobUpdate::new()
///     .cursor(1_204)
///     .processed(200)
///     .stat("media_groups", 3)
///     .progress(40.0);
/// assert!(update.status.is_none());
/// let done = JobUpdate::new().status(JobStatus::Completed);
/// assert_eq!(done.status, Some(JobStatus::Completed));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress_percent: Option<f64>,
    pub cursor: Option<i64>,
    pub total: Option<u64>,
    pub processed: Option<u64>,
    pub failed: Option<u64>,
    pub skipped: Option<u64>,
    pub extra: BTreeMap<String, Value>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Move to Failed with the given message.
    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.status = Some(JobStatus::Failed);
        self.error_message = Some(message.into());
        self
    }

    pub fn progress(mut self, percent: f64) -> Self {
        self.progress_percent = Some(percent);
        self
    }

    pub fn cursor(mut self, cursor: i64) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn processed(mut self, n: u64) -> Self {
        self.processed = Some(n);
        self
    }

    pub fn failed(mut self, n: u64) -> Self {
        self.failed = Some(n);
        self
    }

    pub fn skipped(mut self, n: u64) -> Self {
        self.skipped = Some(n);
        self
    }

    pub fn stat(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// True when nothing but (at most) the status is set.
    pub fn is_status_only(&self) -> bool {
        self.progress_percent.is_none()
            && self.cursor.is_none()
            && self.total.is_none()
            && self.processed.is_none()
            && self.failed.is_none()
            && self.skipped.is_none()
            && self.extra.is_empty()
            && self.error_message.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::new("job-1", "owner-1", Some(100), JobConfig::default())
    }

    #[test]
    fn new_record_is_pending_without_timestamps() {
        let r = record();
        assert_eq!(r.status, JobStatus::Pending);
        assert_eq!(r.cursor, Some(100));
        assert!(r.started_at.is_none());
        assert!(r.ended_at.is_none());
        assert!(!r.resumed);
    }

    #[test]
    fn running_then_completed_stamps_timestamps() {
        let mut r = record();
        let t0 = Utc::now();
        let tr = r
            .apply(&JobUpdate::new().status(JobStatus::Running), t0)
            .unwrap();
        assert_eq!(tr, Some((JobStatus::Pending, JobStatus::Running)));
        assert_eq!(r.started_at, Some(t0));
        assert!(r.ended_at.is_none());

        let t1 = t0 + Duration::seconds(5);
        r.apply(&JobUpdate::new().status(JobStatus::Completed), t1)
            .unwrap();
        assert_eq!(r.ended_at, Some(t1));
        assert_eq!(r.started_at, Some(t0));
    }

    #[test]
    fn rejected_update_leaves_record_untouched() {
        let mut r = record();
        let before = r.clone();
        let err = r
            .apply(
                &JobUpdate::new().status(JobStatus::Completed).cursor(999),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidTransition { .. }));
        assert_eq!(r, before);
    }

    #[test]
    fn counters_may_not_exceed_total() {
        let mut r = record();
        r.apply(&JobUpdate::new().total(10).processed(6), Utc::now())
            .unwrap();
        let err = r
            .apply(&JobUpdate::new().failed(3).skipped(2), Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            StateError::CounterOverflow {
                accounted: 11,
                total: 10,
                ..
            }
        ));
        assert_eq!(r.counters.failed, 0);
        assert_eq!(r.counters.completion_percent(), Some(60.0));
    }

    #[test]
    fn error_message_only_kept_on_failure() {
        let mut r = record();
        r.apply(&JobUpdate::new().status(JobStatus::Running), Utc::now())
            .unwrap();
        let mut not_failed = JobUpdate::new().progress(20.0);
        not_failed.error_message = Some("ignored".into());
        r.apply(&not_failed, Utc::now()).unwrap();
        assert!(r.error_message.is_none());

        r.apply(&JobUpdate::new().fail("target channel gone"), Utc::now())
            .unwrap();
        assert_eq!(r.status, JobStatus::Failed);
        assert_eq!(r.error_message.as_deref(), Some("target channel gone"));
        assert!(r.ended_at.is_some());
    }

    #[test]
    fn finished_record_rejects_field_changes() {
        let mut r = record();
        r.apply(&JobUpdate::new().status(JobStatus::Running), Utc::now())
            .unwrap();
        r.apply(
            &JobUpdate::new().status(JobStatus::Completed).cursor(300),
            Utc::now(),
        )
        .unwrap();
        let done = r.clone();

        for update in [
            JobUpdate::new().cursor(5),
            JobUpdate::new().processed(1),
            JobUpdate::new().progress(10.0),
            JobUpdate::new().stat("media_groups", 1),
            JobUpdate::new().status(JobStatus::Completed).cursor(400),
        ] {
            let err = r.apply(&update, Utc::now()).unwrap_err();
            assert!(matches!(
                err,
                StateError::Finished {
                    status: JobStatus::Completed,
                    ..
                }
            ));
        }
        let mut late_failure = JobUpdate::new();
        late_failure.error_message = Some("too late".into());
        assert!(r.apply(&late_failure, Utc::now()).is_err());
        assert_eq!(r, done);

        // Re-stating the final status is a no-op.
        let same = r
            .apply(&JobUpdate::new().status(JobStatus::Completed), Utc::now())
            .unwrap();
        assert_eq!(same, None);
        assert_eq!(r, done);
    }

    #[test]
    fn progress_is_clamped_and_extra_stats_merge() {
        let mut r = record();
        r.apply(
            &JobUpdate::new().progress(140.0).stat("media_groups", 2),
            Utc::now(),
        )
        .unwrap();
        r.apply(&JobUpdate::new().stat("text_messages", 9), Utc::now())
            .unwrap();
        assert_eq!(r.progress_percent, 100.0);
        assert_eq!(r.counters.extra.len(), 2);
        assert_eq!(r.counters.extra["media_groups"], Value::from(2));
    }

    #[test]
    fn expired_only_for_old_terminal_records() {
        let now = Utc::now();
        let mut r = record();
        assert!(!r.expired(Duration::hours(24), now));
        r.status = JobStatus::Completed;
        r.ended_at = Some(now - Duration::hours(25));
        assert!(r.expired(Duration::hours(24), now));
        r.ended_at = Some(now - Duration::hours(23));
        assert!(!r.expired(Duration::hours(24), now));
    }

    #[test]
    fn stop_written_elsewhere_is_recognised() {
        let mut ours = record();
        ours.apply(&JobUpdate::new().status(JobStatus::Running), Utc::now())
            .unwrap();
        let mut stored = ours.clone();
        stored
            .apply(&JobUpdate::new().status(JobStatus::Cancelled), Utc::now())
            .unwrap();

        assert!(ours.stopped_elsewhere(Some(JobStatus::Running), &stored));
        // We wrote that status ourselves.
        assert!(!ours.stopped_elsewhere(Some(JobStatus::Cancelled), &stored));
        // Running is not a stop.
        assert!(!stored.stopped_elsewhere(Some(JobStatus::Cancelled), &ours));

        ours.apply(&JobUpdate::new().cursor(77), Utc::now()).unwrap();
        ours.take_stop(&stored);
        assert_eq!(ours.status, JobStatus::Cancelled);
        assert_eq!(ours.ended_at, stored.ended_at);
        assert_eq!(ours.cursor, Some(77));
    }

    #[test]
    fn record_json_roundtrip_keeps_cursor_and_counters() {
        let mut r = record();
        r.apply(
            &JobUpdate::new()
                .status(JobStatus::Running)
                .cursor(150)
                .total(50)
                .processed(40)
                .skipped(2),
            Utc::now(),
        )
        .unwrap();
        let json = serde_json::to_string(&r).unwrap();
        let back: JobRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
