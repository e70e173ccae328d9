use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DriverError;
use crate::messages::{
    BindDetails, BindingSpec, DeprovisionDetails, ProvisionDetails, UnbindDetails, UpdateDetails,
};
use crate::types::{LastOperation, OperationKind};

// ---------------------------------------------------------------------------
// Capability descriptor
// ---------------------------------------------------------------------------

/// How a driver is able to complete one lifecycle verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// Always completes before returning. Never hands back an operation.
    Synchronous,
    /// May complete either way; the caller's async acceptance decides.
    Optional,
    /// Only completes asynchronously. Callers that do not accept
    /// asynchronous responses are rejected before the driver is invoked.
    Asynchronous,
}

impl CompletionMode {
    /// Whether a request with the given async acceptance can be served.
    #[must_use]
    pub fn admits(self, accepts_incomplete: bool) -> bool {
        accepts_incomplete || self != Self::Asynchronous
    }

    /// Whether an asynchronous result is allowed for a request with the given
    /// async acceptance.
    #[must_use]
    pub fn allows_async(self, accepts_incomplete: bool) -> bool {
        accepts_incomplete && self != Self::Synchronous
    }
}

/// Per-verb completion modes of a driver.
///
/// One broker core serves synchronous-only, async-capable, and async-only
/// backing services by branching on this descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverCapabilities {
    pub provision: CompletionMode,
    pub update: CompletionMode,
    pub deprovision: CompletionMode,
}

impl DriverCapabilities {
    /// Every verb completes synchronously.
    #[must_use]
    pub fn synchronous() -> Self {
        Self::uniform(CompletionMode::Synchronous)
    }

    /// The same mode for every verb.
    #[must_use]
    pub fn uniform(mode: CompletionMode) -> Self {
        Self {
            provision: mode,
            update: mode,
            deprovision: mode,
        }
    }

    /// Mode for the verb that starts operations of the given kind.
    #[must_use]
    pub fn mode(&self, kind: OperationKind) -> CompletionMode {
        match kind {
            OperationKind::Provision => self.provision,
            OperationKind::Update => self.update,
            OperationKind::Deprovision => self.deprovision,
        }
    }
}

impl Default for DriverCapabilities {
    fn default() -> Self {
        Self::synchronous()
    }
}

// ---------------------------------------------------------------------------
// Driver results
// ---------------------------------------------------------------------------

/// How a driver finished a provision, update, or deprovision call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The work is done.
    Synchronous,
    /// The work was accepted and continues in the background. `operation_data`
    /// is handed back to the driver on every poll.
    Asynchronous { operation_data: Option<String> },
}

impl Completion {
    #[must_use]
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Asynchronous { .. })
    }
}

/// Driver result of a provision call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutcome {
    pub dashboard_url: Option<String>,
    pub completion: Completion,
}

/// Driver result of an update call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// A new dashboard URL, if the update changed it.
    pub dashboard_url: Option<String>,
    pub completion: Completion,
}

/// Identifies an asynchronous operation when polling the driver.
#[derive(Debug, Clone, Copy)]
pub struct OperationRef<'a> {
    pub kind: OperationKind,
    /// Token the broker issued to the orchestrator.
    pub token: &'a str,
    /// Continuation data the driver returned when accepting the work.
    pub operation_data: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// ServiceDriver
// ---------------------------------------------------------------------------

/// Pluggable backing-service driver.
///
/// The driver is the only component that performs side effects on the real
/// backing service. The broker core invokes each method at most once per
/// incoming request and never retries. Implementations must be safe to call
/// concurrently for distinct instances.
#[async_trait]
pub trait ServiceDriver: Send + Sync {
    /// Completion modes per verb. Consulted before every call.
    fn capabilities(&self) -> DriverCapabilities;

    /// Create the backing resources for a new instance.
    async fn provision(
        &self,
        instance_id: &str,
        details: &ProvisionDetails,
        accepts_incomplete: bool,
    ) -> Result<ProvisionOutcome, DriverError>;

    /// Change the plan or parameters of an existing instance.
    async fn update(
        &self,
        instance_id: &str,
        details: &UpdateDetails,
        accepts_incomplete: bool,
    ) -> Result<UpdateOutcome, DriverError>;

    /// Destroy the backing resources of an instance. May be called for an
    /// instance the broker does not know, to clean up orphans.
    async fn deprovision(
        &self,
        instance_id: &str,
        details: &DeprovisionDetails,
        accepts_incomplete: bool,
    ) -> Result<Completion, DriverError>;

    /// Create credentials for an application.
    async fn bind(
        &self,
        instance_id: &str,
        binding_id: &str,
        details: &BindDetails,
    ) -> Result<BindingSpec, DriverError>;

    /// Revoke credentials created by `bind`.
    async fn unbind(
        &self,
        instance_id: &str,
        binding_id: &str,
        details: &UnbindDetails,
    ) -> Result<(), DriverError>;

    /// Report the progress of an asynchronous operation. Must not have side
    /// effects beyond observing the backing service.
    async fn poll(
        &self,
        instance_id: &str,
        operation: OperationRef<'_>,
    ) -> Result<LastOperation, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asynchronous_mode_requires_async_acceptance() {
        assert!(!CompletionMode::Asynchronous.admits(false));
        assert!(CompletionMode::Asynchronous.admits(true));
        assert!(CompletionMode::Synchronous.admits(false));
        assert!(CompletionMode::Optional.admits(false));
    }

    #[test]
    fn synchronous_mode_never_allows_async_results() {
        assert!(!CompletionMode::Synchronous.allows_async(true));
        assert!(!CompletionMode::Optional.allows_async(false));
        assert!(CompletionMode::Optional.allows_async(true));
        assert!(CompletionMode::Asynchronous.allows_async(true));
    }

    #[test]
    fn capabilities_select_mode_per_kind() {
        let caps = DriverCapabilities {
            provision: CompletionMode::Optional,
            update: CompletionMode::Synchronous,
            deprovision: CompletionMode::Asynchronous,
        };
        assert_eq!(caps.mode(OperationKind::Provision), CompletionMode::Optional);
        assert_eq!(caps.mode(OperationKind::Update), CompletionMode::Synchronous);
        assert_eq!(
            caps.mode(OperationKind::Deprovision),
            CompletionMode::Asynchronous
        );
        assert_eq!(DriverCapabilities::default(), DriverCapabilities::synchronous());
    }
}
