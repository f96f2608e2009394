//! Built-in mitigation hooks wired to the state cache and the scheduler.

use std::sync::Arc;

use async_trait::async_trait;

use crate::monitor::{MitigationAction, MitigationError, MitigationHook, ResourceMonitor};
use crate::scheduler::AdmissionScheduler;
use crate::state::StateCache;

struct CompactCache(Arc<StateCache>);

#[async_trait]
impl MitigationHook for CompactCache {
    fn name(&self) -> &str {
        "state-cache-compact"
    }

    async fn run(&self) -> Result<(), MitigationError> {
        self.0.compact();
        Ok(())
    }
}

struct PurgeTerminal(Arc<StateCache>);

#[async_trait]
impl MitigationHook for PurgeTerminal {
    fn name(&self) -> &str {
        "state-cache-purge"
    }

    async fn run(&self) -> Result<(), MitigationError> {
        self.0.purge_terminal();
        Ok(())
    }
}

struct PauseLowPriority(Arc<AdmissionScheduler>);

#[async_trait]
impl MitigationHook for PauseLowPriority {
    fn name(&self) -> &str {
        "scheduler-pause-low-priority"
    }

    async fn run(&self) -> Result<(), MitigationError> {
        self.0.pause_low_priority().await;
        Ok(())
    }
}

struct SweepCache(Arc<StateCache>);

#[async_trait]
impl MitigationHook for SweepCache {
    fn name(&self) -> &str {
        "state-cache-sweep"
    }

    async fn run(&self) -> Result<(), MitigationError> {
        self.0.sweep().await;
        match self.0.dirty_count() {
            0 => Ok(()),
            n => Err(MitigationError::new(
                self.name(),
                format!("{} records still unsaved after sweep", n),
            )),
        }
    }
}

/// One hook per ladder action.
pub(crate) fn register_builtin_hooks(
    monitor: &ResourceMonitor,
    state: &Arc<StateCache>,
    scheduler: &Arc<AdmissionScheduler>,
) {
    monitor.register(
        MitigationAction::Reclaim,
        Arc::new(CompactCache(Arc::clone(state))),
    );
    monitor.register(
        MitigationAction::CachePurge,
        Arc::new(PurgeTerminal(Arc::clone(state))),
    );
    monitor.register(
        MitigationAction::PauseLowPriority,
        Arc::new(PauseLowPriority(Arc::clone(scheduler))),
    );
    monitor.register(
        MitigationAction::FullSweep,
        Arc::new(SweepCache(Arc::clone(state))),
    );
}
