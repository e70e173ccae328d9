//! Request details and responses of the six lifecycle operations.
//!
//! Request structs mirror the Open Service Broker v2 request bodies (or query
//! parameters, for deprovision and unbind). Response structs serialize to the
//! protocol's response bodies; fields that only steer the transport's status
//! code (`is_async`, `already_exists`) are skipped on the wire.

use serde::{Deserialize, Serialize};

use crate::types::{Parameters, VolumeMount};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Body of a provision request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionDetails {
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub organization_guid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub space_guid: String,
    #[serde(default)]
    pub parameters: Parameters,
}

/// Values of the instance before the update, as known to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreviousValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<String>,
}

/// Body of an update request. Absent fields leave the instance unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateDetails {
    #[serde(default)]
    pub service_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_values: Option<PreviousValues>,
}

/// Query parameters of a deprovision request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeprovisionDetails {
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub plan_id: String,
}

/// Resource a binding is created for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

/// Body of a bind request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindDetails {
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_resource: Option<BindResource>,
    #[serde(default)]
    pub parameters: Parameters,
}

impl BindDetails {
    /// The application guid, taken from `bind_resource` when the top-level
    /// field is absent.
    #[must_use]
    pub fn app_guid(&self) -> Option<&str> {
        self.app_guid.as_deref().or_else(|| {
            self.bind_resource
                .as_ref()
                .and_then(|resource| resource.app_guid.as_deref())
        })
    }
}

/// Query parameters of an unbind request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbindDetails {
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub plan_id: String,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Result of a provision call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
    /// Operation token to poll with; present only for asynchronous completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip)]
    pub is_async: bool,
    /// The request replayed an identical earlier provision.
    #[serde(skip)]
    pub already_exists: bool,
}

/// Result of an update call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip)]
    pub is_async: bool,
}

/// Result of a deprovision call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeprovisionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip)]
    pub is_async: bool,
}

/// Credentials and adjuncts produced by a bind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindingSpec {
    #[serde(default)]
    pub credentials: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syslog_drain_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}

/// Result of a bind call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BindResponse {
    #[serde(flatten)]
    pub binding: BindingSpec,
    /// The request replayed an identical earlier bind.
    #[serde(skip)]
    pub already_exists: bool,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn provision_response_hides_transport_flags() {
        let response = ProvisionResponse {
            dashboard_url: Some("https://dash.example/a".to_string()),
            operation: Some("op-1".to_string()),
            is_async: true,
            already_exists: false,
        };
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(
            wire,
            json!({"dashboard_url": "https://dash.example/a", "operation": "op-1"})
        );
    }

    #[test]
    fn bind_details_app_guid_falls_back_to_bind_resource() {
        let details: BindDetails = serde_json::from_value(json!({
            "service_id": "svc",
            "plan_id": "plan",
            "bind_resource": {"app_guid": "app-1"}
        }))
        .unwrap();
        assert_eq!(details.app_guid(), Some("app-1"));
        assert!(details.parameters.is_empty());
    }

    #[test]
    fn bind_response_flattens_binding() {
        let response = BindResponse {
            binding: BindingSpec {
                credentials: json!({"host": "127.0.0.1"}),
                syslog_drain_url: Some("syslog://drain".to_string()),
                ..BindingSpec::default()
            },
            already_exists: true,
        };
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["credentials"]["host"], "127.0.0.1");
        assert_eq!(wire["syslog_drain_url"], "syslog://drain");
        assert!(wire.get("already_exists").is_none());
    }

    #[test]
    fn update_details_distinguishes_absent_parameters() {
        let details: UpdateDetails =
            serde_json::from_value(json!({"service_id": "svc", "plan_id": "large"})).unwrap();
        assert_eq!(details.plan_id.as_deref(), Some("large"));
        assert!(details.parameters.is_none());
    }
}
