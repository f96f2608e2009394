//! Job lifecycle shared by the state cache, the scheduler and the monitor.
//!
//! Records only change through `StateCache::update`, which validates every
//! status change against `JobStatus::can_transition_to`.

mod record;
mod status;

pub use record::{JobConfig, JobCounters, JobRecord, JobUpdate};
pub use status::JobStatus;
