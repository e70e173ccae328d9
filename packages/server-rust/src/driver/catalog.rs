//! Catalog served when no catalog file is configured.

use osbroker_core::catalog::{ServiceMetadata, ServicePlanMetadata};
use osbroker_core::{Catalog, Service, ServicePlan};

/// Service id of the built-in catalog entry.
pub const BUILTIN_SERVICE_ID: &str = "osbroker-memory";

fn plan(id: &str, description: &str, free: bool) -> ServicePlan {
    ServicePlan {
        id: format!("{BUILTIN_SERVICE_ID}-{id}"),
        name: id.to_string(),
        description: description.to_string(),
        free: Some(free),
        bindable: None,
        metadata: Some(ServicePlanMetadata {
            bullets: Vec::new(),
            display_name: id.to_string(),
        }),
    }
}

/// A single bindable, plan-updateable service backed by [`InMemoryDriver`]
/// with a free `small` plan and a paid `large` plan.
///
/// [`InMemoryDriver`]: super::InMemoryDriver
#[must_use]
pub fn builtin_catalog() -> Catalog {
    Catalog::new(vec![Service {
        id: BUILTIN_SERVICE_ID.to_string(),
        name: "in-memory".to_string(),
        description: "Process-local resources for development and testing".to_string(),
        bindable: true,
        plan_updateable: true,
        plans: vec![
            plan("small", "Small in-memory resource", true),
            plan("large", "Large in-memory resource", false),
        ],
        metadata: Some(ServiceMetadata {
            display_name: "In-Memory".to_string(),
            ..ServiceMetadata::default()
        }),
        tags: vec!["memory".to_string()],
        requires: Vec::new(),
    }])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_offers_two_plans() {
        let catalog = builtin_catalog();
        assert_eq!(catalog.services.len(), 1);
        assert!(catalog
            .plan(BUILTIN_SERVICE_ID, "osbroker-memory-small")
            .is_some());
        assert!(catalog
            .plan(BUILTIN_SERVICE_ID, "osbroker-memory-large")
            .is_some());
        assert!(catalog.plan(BUILTIN_SERVICE_ID, "small").is_none());
    }

    #[test]
    fn builtin_catalog_serializes_as_osb_document() {
        let json = serde_json::to_value(builtin_catalog()).unwrap();
        assert_eq!(json["services"][0]["id"], BUILTIN_SERVICE_ID);
        assert_eq!(json["services"][0]["plan_updateable"], true);
        assert_eq!(json["services"][0]["plans"][1]["free"], false);
    }
}
