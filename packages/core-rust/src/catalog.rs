//! Read-only catalog of services and plans offered by the broker.

use serde::{Deserialize, Serialize};

/// Display metadata attached to a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePlanMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bullets: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
}

/// A plan a service can be provisioned with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePlan {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Whether the plan is free of charge. Absent means free.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free: Option<bool>,
    /// Overrides the service-level `bindable` flag when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bindable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ServicePlanMetadata>,
}

/// Display metadata attached to a service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub long_description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub documentation_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub support_url: String,
}

/// A service offering with its plans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub description: String,
    pub bindable: bool,
    #[serde(default)]
    pub plan_updateable: bool,
    pub plans: Vec<ServicePlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ServiceMetadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Platform permissions the service needs (`syslog_drain`, `route_forwarding`,
    /// `volume_mount`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
}

impl Service {
    /// Looks up a plan of this service by id.
    #[must_use]
    pub fn plan(&self, plan_id: &str) -> Option<&ServicePlan> {
        self.plans.iter().find(|plan| plan.id == plan_id)
    }

    /// Whether bindings may be created under the given plan.
    #[must_use]
    pub fn is_bindable(&self, plan_id: &str) -> bool {
        self.plan(plan_id)
            .and_then(|plan| plan.bindable)
            .unwrap_or(self.bindable)
    }
}

/// The full catalog, serialized as the body of `GET /v2/catalog`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub services: Vec<Service>,
}

impl Catalog {
    /// Creates a catalog from a list of services.
    #[must_use]
    pub fn new(services: Vec<Service>) -> Self {
        Self { services }
    }

    /// Looks up a service by id.
    #[must_use]
    pub fn service(&self, service_id: &str) -> Option<&Service> {
        self.services.iter().find(|service| service.id == service_id)
    }

    /// Looks up a service and one of its plans. Returns `None` when either is
    /// unknown or the plan belongs to a different service.
    #[must_use]
    pub fn plan(&self, service_id: &str, plan_id: &str) -> Option<(&Service, &ServicePlan)> {
        let service = self.service(service_id)?;
        service.plan(plan_id).map(|plan| (service, plan))
    }

    /// Parses a catalog from its JSON representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid catalog.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
