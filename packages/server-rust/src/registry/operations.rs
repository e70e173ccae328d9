//! Operation tracker: in-flight and recently finished asynchronous operations.
//!
//! Holds at most one operation per instance. Starting a new operation while
//! the current one is still in progress fails; a finished operation is kept
//! so repeated polls keep returning the same terminal status, and is replaced
//! by the next operation on that instance or swept after a retention period.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use osbroker_core::{BrokerError, LastOperation, OperationKind, OperationState, Parameters};
use uuid::Uuid;

/// Changes an asynchronous update applies to the instance once it succeeds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingUpdate {
    pub plan_id: Option<String>,
    pub parameters: Option<Parameters>,
    pub dashboard_url: Option<String>,
}

/// One asynchronous operation as tracked by the broker.
#[derive(Debug, Clone)]
pub struct TrackedOperation {
    /// Opaque token handed to the orchestrator.
    pub token: String,
    pub instance_id: String,
    pub kind: OperationKind,
    pub state: OperationState,
    pub description: Option<String>,
    /// Continuation data returned by the driver when it accepted the work.
    pub operation_data: Option<String>,
    pub pending_update: Option<PendingUpdate>,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
}

impl TrackedOperation {
    /// Whether the operation is still in progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    /// The status as reported by `LastOperation`.
    #[must_use]
    pub fn last_operation(&self) -> LastOperation {
        LastOperation {
            state: self.state,
            description: self.description.clone(),
        }
    }
}

/// Tracker of asynchronous operations keyed by instance.
#[derive(Debug, Default)]
pub struct OperationTracker {
    by_instance: DashMap<String, TrackedOperation>,
}

impl OperationTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_instance: DashMap::new(),
        }
    }

    /// Starts tracking a new in-progress operation and returns its token.
    ///
    /// # Errors
    ///
    /// Returns `OperationInProgress` if the instance already has an active
    /// operation.
    pub fn begin(
        &self,
        instance_id: &str,
        kind: OperationKind,
        operation_data: Option<String>,
        pending_update: Option<PendingUpdate>,
    ) -> Result<String, BrokerError> {
        let operation = TrackedOperation {
            token: Uuid::new_v4().to_string(),
            instance_id: instance_id.to_string(),
            kind,
            state: OperationState::InProgress,
            description: None,
            operation_data,
            pending_update,
            started_at: Instant::now(),
            finished_at: None,
        };
        let token = operation.token.clone();

        match self.by_instance.entry(instance_id.to_string()) {
            Entry::Occupied(existing) if existing.get().is_active() => {
                Err(BrokerError::OperationInProgress {
                    instance_id: instance_id.to_string(),
                    kind: existing.get().kind,
                })
            }
            Entry::Occupied(mut finished) => {
                finished.insert(operation);
                Ok(token)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(operation);
                Ok(token)
            }
        }
    }

    /// The active operation on an instance, if any.
    #[must_use]
    pub fn active(&self, instance_id: &str) -> Option<TrackedOperation> {
        self.by_instance
            .get(instance_id)
            .filter(|entry| entry.is_active())
            .map(|entry| entry.clone())
    }

    /// Fails with `OperationInProgress` if the instance has an active operation.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn ensure_idle(&self, instance_id: &str) -> Result<(), BrokerError> {
        match self.active(instance_id) {
            Some(operation) => Err(BrokerError::OperationInProgress {
                instance_id: instance_id.to_string(),
                kind: operation.kind,
            }),
            None => Ok(()),
        }
    }

    /// Looks up the operation a poll refers to.
    ///
    /// Without a token the instance's current operation is returned.
    ///
    /// # Errors
    ///
    /// Returns `OperationNotFound` when nothing is tracked for the instance or
    /// the token does not match.
    pub fn lookup(
        &self,
        instance_id: &str,
        token: Option<&str>,
    ) -> Result<TrackedOperation, BrokerError> {
        self.by_instance
            .get(instance_id)
            .filter(|entry| token.is_none_or(|token| entry.token == token))
            .map(|entry| entry.clone())
            .ok_or_else(|| BrokerError::OperationNotFound {
                instance_id: instance_id.to_string(),
            })
    }

    /// Caches the latest description of an operation that is still running.
    pub fn refresh(&self, instance_id: &str, token: &str, description: Option<String>) {
        if let Some(mut entry) = self.by_instance.get_mut(instance_id) {
            if entry.token == token && entry.is_active() {
                entry.description = description;
            }
        }
    }

    /// Moves an in-progress operation to a terminal state.
    ///
    /// Returns `false` if the operation is no longer current or already
    /// finished; the caller must then leave instance state alone.
    pub fn finish(&self, instance_id: &str, token: &str, outcome: &LastOperation) -> bool {
        match self.by_instance.get_mut(instance_id) {
            Some(mut entry) if entry.token == token && entry.is_active() => {
                entry.state = outcome.state;
                entry.description.clone_from(&outcome.description);
                entry.finished_at = Some(Instant::now());
                true
            }
            _ => false,
        }
    }

    /// Stops tracking anything for the instance.
    pub fn forget(&self, instance_id: &str) -> Option<TrackedOperation> {
        self.by_instance.remove(instance_id).map(|(_, op)| op)
    }

    /// Removes finished operations older than `retention`. Returns how many
    /// were removed. Active operations are never swept.
    pub fn sweep(&self, retention: Duration) -> usize {
        let before = self.by_instance.len();
        self.by_instance.retain(|_, operation| {
            operation
                .finished_at
                .is_none_or(|finished| finished.elapsed() < retention)
        });
        before.saturating_sub(self.by_instance.len())
    }

    /// Number of operations still in progress.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.by_instance
            .iter()
            .filter(|entry| entry.value().is_active())
            .count()
    }

    /// Number of tracked operations, finished ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_instance.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_instance.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn succeeded() -> LastOperation {
        LastOperation {
            state: OperationState::Succeeded,
            description: Some("done".to_string()),
        }
    }

    #[test]
    fn one_active_operation_per_instance() {
        let tracker = OperationTracker::new();
        let token = tracker
            .begin("a", OperationKind::Provision, None, None)
            .unwrap();
        assert!(!token.is_empty());

        let err = tracker
            .begin("a", OperationKind::Update, None, None)
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::OperationInProgress { kind: OperationKind::Provision, .. }
        ));

        // Distinct instances are independent.
        tracker.begin("b", OperationKind::Provision, None, None).unwrap();
        assert_eq!(tracker.active_count(), 2);
    }

    #[test]
    fn finished_operation_is_replaced_by_the_next() {
        let tracker = OperationTracker::new();
        let first = tracker.begin("a", OperationKind::Provision, None, None).unwrap();
        assert!(tracker.finish("a", &first, &succeeded()));

        let second = tracker.begin("a", OperationKind::Deprovision, None, None).unwrap();
        assert_ne!(first, second);
        assert!(matches!(
            tracker.lookup("a", Some(&first)),
            Err(BrokerError::OperationNotFound { .. })
        ));
        assert_eq!(tracker.lookup("a", None).unwrap().kind, OperationKind::Deprovision);
    }

    #[test]
    fn lookup_matches_token() {
        let tracker = OperationTracker::new();
        let token = tracker.begin("a", OperationKind::Provision, None, None).unwrap();

        assert_eq!(tracker.lookup("a", Some(&token)).unwrap().token, token);
        assert!(tracker.lookup("a", Some("other")).is_err());
        assert!(tracker.lookup("missing", None).is_err());
    }

    #[test]
    fn finish_only_transitions_once() {
        let tracker = OperationTracker::new();
        let token = tracker.begin("a", OperationKind::Provision, None, None).unwrap();

        assert!(tracker.finish("a", &token, &succeeded()));
        assert!(!tracker.finish("a", &token, &succeeded()));
        assert!(!tracker.finish("a", "stale", &succeeded()));

        let op = tracker.lookup("a", Some(&token)).unwrap();
        assert_eq!(op.state, OperationState::Succeeded);
        assert_eq!(op.description.as_deref(), Some("done"));
        assert!(op.finished_at.is_some());
    }

    #[test]
    fn refresh_ignores_finished_operations() {
        let tracker = OperationTracker::new();
        let token = tracker.begin("a", OperationKind::Update, None, None).unwrap();

        tracker.refresh("a", &token, Some("50%".to_string()));
        assert_eq!(
            tracker.lookup("a", None).unwrap().description.as_deref(),
            Some("50%")
        );

        tracker.finish("a", &token, &succeeded());
        tracker.refresh("a", &token, Some("stale".to_string()));
        assert_eq!(
            tracker.lookup("a", None).unwrap().description.as_deref(),
            Some("done")
        );
    }

    #[test]
    fn sweep_removes_only_expired_terminal_operations() {
        let tracker = OperationTracker::new();
        let done = tracker.begin("a", OperationKind::Provision, None, None).unwrap();
        tracker.begin("b", OperationKind::Provision, None, None).unwrap();
        tracker.finish("a", &done, &succeeded());

        assert_eq!(tracker.sweep(Duration::from_secs(3600)), 0);
        assert_eq!(tracker.sweep(Duration::ZERO), 1);
        assert!(tracker.lookup("a", None).is_err());
        assert!(tracker.active("b").is_some());
    }

    #[test]
    fn ensure_idle_reports_the_active_kind() {
        let tracker = OperationTracker::new();
        assert!(tracker.ensure_idle("a").is_ok());
        tracker.begin("a", OperationKind::Deprovision, None, None).unwrap();
        assert!(matches!(
            tracker.ensure_idle("a"),
            Err(BrokerError::OperationInProgress { kind: OperationKind::Deprovision, .. })
        ));
    }
}
