//! Admission, checkpointing and memory mitigation for long-running, resumable
//! bulk-transfer jobs.
//!
//! [`service::BulkService`] wires the pieces together: a write-back
//! [`state::StateCache`] over a [`store::JobRecordStore`], an
//! [`scheduler::AdmissionScheduler`] enforcing concurrency and resource limits,
//! and a [`monitor::ResourceMonitor`] driving the mitigation ladder.

pub mod config;
pub mod error;
pub mod job;
pub mod logging;
pub mod monitor;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod store;
pub mod ticker;

mod sync;
