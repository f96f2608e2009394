//! Periodic background loops (admission, resource monitor, write-back).
//!
//! Each loop is a single tokio task that awaits its tick before waiting for
//! the next one, so two ticks of the same loop never overlap. Stop requests
//! are only observed between ticks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Work driven by a ticker.
#[async_trait]
pub trait Periodic: Send + Sync + 'static {
    /// One round of work. Failures are handled inside; a tick never ends the loop.
    async fn tick(&self);

    /// Runs once after the stop request, before the task exits.
    async fn finish(&self) {}
}

/// Handle to a running loop.
pub struct TickerHandle {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TickerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the loop to stop and wait for it (including `finish`).
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.join.await {
            tracing::warn!(ticker = self.name, "ticker task ended abnormally: {}", e);
        }
    }
}

/// Spawn `task` on the current runtime, ticking every `period`.
///
/// The first tick runs immediately.
pub fn spawn<P: Periodic>(name: &'static str, task: Arc<P>, period: Duration) -> TickerHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let period = period.max(Duration::from_millis(1));
    let join = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(ticker = name, ?period, "ticker started");
        loop {
            tokio::select! {
                _ = interval.tick() => task.tick().await,
                _ = stop_rx.changed() => break,
            }
        }
        task.finish().await;
        tracing::debug!(ticker = name, "ticker stopped");
    });
    TickerHandle {
        name,
        stop_tx,
        join,
    }
}
