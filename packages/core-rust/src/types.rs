//! Broker-side data model: instances, bindings, and asynchronous operation state.
//!
//! Field names follow the Open Service Broker wire format (snake_case), so the
//! same types are used by the transport layer without an intermediate mapping.

use serde::{Deserialize, Serialize};

/// Opaque key-value payload supplied by the orchestrator (provision, update,
/// and bind parameters). The broker never interprets it.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

/// Lifecycle state of a registered service instance.
///
/// State machine:
/// `Provisioning -> Ready <-> Updating`, `Ready -> Deprovisioning -> (removed)`,
/// `Provisioning -> Failed`. Synchronous operations skip the transitional
/// states entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Asynchronous provision accepted, not yet finished.
    Provisioning,
    /// Fully provisioned and usable.
    Ready,
    /// Asynchronous update accepted, not yet finished.
    Updating,
    /// Asynchronous deprovision accepted, not yet finished.
    Deprovisioning,
    /// Asynchronous provision reported failure. The instance stays registered
    /// until the orchestrator deprovisions it.
    Failed,
}

impl InstanceState {
    /// Returns the wire name of the state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Updating => "updating",
            Self::Deprovisioning => "deprovisioning",
            Self::Failed => "failed",
        }
    }
}

/// A single provisioned occurrence of a backing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Platform-assigned identifier, unique across the registry.
    pub instance_id: String,
    /// Catalog service the instance belongs to.
    pub service_id: String,
    /// Catalog plan currently in effect.
    pub plan_id: String,
    /// Parameters the instance was provisioned (or last updated) with.
    #[serde(default)]
    pub parameters: Parameters,
    /// Dashboard URL reported by the driver, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
    /// Current lifecycle state.
    pub state: InstanceState,
}

impl ServiceInstance {
    /// Returns `true` when a repeated provision request carries exactly the
    /// details this instance was created with.
    #[must_use]
    pub fn matches(&self, service_id: &str, plan_id: &str, parameters: &Parameters) -> bool {
        self.service_id == service_id && self.plan_id == plan_id && &self.parameters == parameters
    }
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// Device descriptor of a shared volume mount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedDevice {
    /// Identifier of the volume on the backing service.
    pub volume_id: String,
    /// Driver-specific mount configuration.
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub mount_config: Parameters,
}

/// Volume mount handed to the application together with its credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Name of the volume driver plugin.
    pub driver: String,
    /// Path the volume is mounted at inside the application container.
    pub container_dir: String,
    /// `r` or `rw`.
    pub mode: String,
    /// Only `shared` is defined by the protocol.
    pub device_type: String,
    /// Device details.
    pub device: SharedDevice,
}

/// Credentials and adjuncts granting one application access to an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceBinding {
    /// Identifier, unique within the owning instance.
    pub binding_id: String,
    /// Owning instance. Must reference a registered instance at creation time.
    pub instance_id: String,
    /// Catalog service of the owning instance.
    pub service_id: String,
    /// Catalog plan the binding was created under.
    pub plan_id: String,
    /// Application the binding was created for, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_guid: Option<String>,
    /// Parameters the binding was created with.
    #[serde(default)]
    pub parameters: Parameters,
    /// Driver-produced credentials payload.
    pub credentials: serde_json::Value,
    /// Syslog drain URL, if the driver supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syslog_drain_url: Option<String>,
    /// Route service URL, if the driver supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_service_url: Option<String>,
    /// Volume mounts, if the driver supplied any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

impl ServiceBinding {
    /// Returns `true` when a repeated bind request carries exactly the
    /// details this binding was created with.
    #[must_use]
    pub fn matches(
        &self,
        service_id: &str,
        plan_id: &str,
        app_guid: Option<&str>,
        parameters: &Parameters,
    ) -> bool {
        self.service_id == service_id
            && self.plan_id == plan_id
            && self.app_guid.as_deref() == app_guid
            && &self.parameters == parameters
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Lifecycle verb an asynchronous operation was started by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Provision,
    Update,
    Deprovision,
}

impl OperationKind {
    /// Returns the verb name used in logs and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::Update => "update",
            Self::Deprovision => "deprovision",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an asynchronous operation as reported to the orchestrator.
///
/// `Succeeded` and `Failed` are terminal: the orchestrator stops polling
/// once it observes either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

impl OperationState {
    /// Returns `true` for `Succeeded` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }

    /// Returns the wire name of the state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// Result of a `LastOperation` poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastOperation {
    pub state: OperationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl LastOperation {
    /// An in-progress status without description.
    #[must_use]
    pub fn in_progress() -> Self {
        Self {
            state: OperationState::InProgress,
            description: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(value: serde_json::Value) -> Parameters {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn operation_state_uses_protocol_wire_names() {
        assert_eq!(
            serde_json::to_value(OperationState::InProgress).unwrap(),
            json!("in progress")
        );
        let parsed: OperationState = serde_json::from_value(json!("succeeded")).unwrap();
        assert_eq!(parsed, OperationState::Succeeded);
        assert!(parsed.is_terminal());
        assert!(!OperationState::InProgress.is_terminal());
    }

    #[test]
    fn instance_matches_requires_identical_parameters() {
        let instance = ServiceInstance {
            instance_id: "a".to_string(),
            service_id: "svc".to_string(),
            plan_id: "small".to_string(),
            parameters: params(json!({"size": 1})),
            dashboard_url: None,
            state: InstanceState::Ready,
        };

        assert!(instance.matches("svc", "small", &params(json!({"size": 1}))));
        assert!(!instance.matches("svc", "small", &params(json!({"size": 2}))));
        assert!(!instance.matches("svc", "large", &params(json!({"size": 1}))));
    }

    #[test]
    fn binding_omits_empty_adjuncts_on_the_wire() {
        let binding = ServiceBinding {
            binding_id: "b".to_string(),
            instance_id: "a".to_string(),
            service_id: "svc".to_string(),
            plan_id: "small".to_string(),
            app_guid: None,
            parameters: Parameters::new(),
            credentials: json!({"username": "u"}),
            syslog_drain_url: None,
            route_service_url: None,
            volume_mounts: Vec::new(),
        };

        let wire = serde_json::to_value(&binding).unwrap();
        assert!(wire.get("syslog_drain_url").is_none());
        assert!(wire.get("volume_mounts").is_none());
        assert_eq!(wire["credentials"]["username"], "u");
    }
}
