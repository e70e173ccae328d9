//! Background sweeping of finished asynchronous operations.
//!
//! Finished operations stay pollable for the configured retention so an
//! orchestrator that retries `last_operation` still gets the terminal answer.
//! The [`OperationSweeper`] drops them afterwards on a fixed period, until
//! its [`SweeperHandle`] is stopped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::registry::OperationTracker;

// ---------------------------------------------------------------------------
// OperationSweeper
// ---------------------------------------------------------------------------

/// Removes finished operations older than the retention period.
///
/// Active operations are never touched, so an orchestrator can always poll
/// work it started.
#[derive(Debug, Clone)]
pub struct OperationSweeper {
    operations: Arc<OperationTracker>,
    retention: Duration,
}

impl OperationSweeper {
    #[must_use]
    pub fn new(operations: Arc<OperationTracker>, retention: Duration) -> Self {
        Self {
            operations,
            retention,
        }
    }

    /// Runs one sweep and returns how many operations were dropped.
    pub fn sweep_once(&self) -> usize {
        let removed = self.operations.sweep(self.retention);
        if removed > 0 {
            debug!(removed, remaining = self.operations.len(), "swept finished operations");
        }
        removed
    }

    /// Sweeps every `period` on a spawned task. The first sweep happens one
    /// full period after the call.
    #[must_use]
    pub fn spawn(self, period: Duration) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut swept = 0;

            loop {
                tokio::select! {
                    _ = ticks.tick() => swept += self.sweep_once(),
                    _ = &mut stop_rx => break,
                }
            }
            swept
        });

        SweeperHandle {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }
}

// ---------------------------------------------------------------------------
// SweeperHandle
// ---------------------------------------------------------------------------

/// Owner of a running sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<usize>>,
}

impl SweeperHandle {
    /// Stops the sweeper and waits for it to exit. Returns the number of
    /// operations it removed over its lifetime; zero on a second call.
    pub async fn stop(&mut self) -> usize {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let Some(task) = self.task.take() else {
            return 0;
        };
        let swept = task.await.unwrap_or_default();
        info!(swept, "operation sweeper stopped");
        swept
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use osbroker_core::{LastOperation, OperationKind, OperationState};

    use super::*;

    fn succeeded() -> LastOperation {
        LastOperation {
            state: OperationState::Succeeded,
            description: None,
        }
    }

    /// Tracker with a finished provision on "done" and an active one on "busy".
    fn tracker() -> Arc<OperationTracker> {
        let tracker = Arc::new(OperationTracker::new());
        let token = tracker
            .begin("done", OperationKind::Provision, None, None)
            .unwrap();
        tracker.finish("done", &token, &succeeded());
        tracker
            .begin("busy", OperationKind::Provision, None, None)
            .unwrap();
        tracker
    }

    #[test]
    fn sweep_once_keeps_active_operations() {
        let operations = tracker();
        let sweeper = OperationSweeper::new(Arc::clone(&operations), Duration::ZERO);

        assert_eq!(sweeper.sweep_once(), 1);
        assert_eq!(operations.len(), 1);
        assert!(operations.active("busy").is_some());
        assert_eq!(sweeper.sweep_once(), 0);
    }

    #[test]
    fn finished_operations_stay_pollable_within_retention() {
        let operations = tracker();
        let sweeper = OperationSweeper::new(Arc::clone(&operations), Duration::from_secs(3600));

        assert_eq!(sweeper.sweep_once(), 0);
        assert!(operations.lookup("done", None).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_sweeper_waits_a_full_period() {
        let operations = tracker();
        let mut handle = OperationSweeper::new(Arc::clone(&operations), Duration::ZERO)
            .spawn(Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(operations.len(), 2);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(operations.len(), 1);

        assert_eq!(handle.stop().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_sweeper_picks_up_operations_finished_later() {
        let operations = tracker();
        let mut handle = OperationSweeper::new(Arc::clone(&operations), Duration::ZERO)
            .spawn(Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let token = operations.active("busy").unwrap().token;
        operations.finish("busy", &token, &succeeded());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(operations.is_empty());
        assert_eq!(handle.stop().await, 2);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut handle = OperationSweeper::new(tracker(), Duration::ZERO)
            .spawn(Duration::from_secs(60));

        assert_eq!(handle.stop().await, 0);
        assert_eq!(handle.stop().await, 0);
    }
}
