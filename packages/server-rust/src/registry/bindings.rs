//! Binding registry: binding state per (instance, binding) pair.
//!
//! Bindings are grouped under their owning instance so that binding ids only
//! have to be unique per instance and a cascade on deprovision is a single
//! removal.

use std::collections::HashMap;

use dashmap::DashMap;
use osbroker_core::{BrokerError, ServiceBinding};

use super::instances::InstanceRegistry;

/// Registry of service bindings keyed by owning instance.
#[derive(Debug, Default)]
pub struct BindingRegistry {
    by_instance: DashMap<String, HashMap<String, ServiceBinding>>,
}

impl BindingRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_instance: DashMap::new(),
        }
    }

    /// Registers a binding under its owning instance.
    ///
    /// # Errors
    ///
    /// Returns `InstanceDoesNotExist` if the owning instance is not
    /// registered, and `BindingAlreadyExists` if the id is taken.
    pub fn insert(
        &self,
        instances: &InstanceRegistry,
        binding: ServiceBinding,
    ) -> Result<(), BrokerError> {
        if !instances.contains(&binding.instance_id) {
            return Err(BrokerError::InstanceDoesNotExist {
                instance_id: binding.instance_id,
            });
        }

        let mut bindings = self
            .by_instance
            .entry(binding.instance_id.clone())
            .or_default();
        if bindings.contains_key(&binding.binding_id) {
            return Err(BrokerError::BindingAlreadyExists {
                instance_id: binding.instance_id,
                binding_id: binding.binding_id,
            });
        }
        bindings.insert(binding.binding_id.clone(), binding);
        Ok(())
    }

    /// Returns a snapshot of a binding, if registered.
    #[must_use]
    pub fn get(&self, instance_id: &str, binding_id: &str) -> Option<ServiceBinding> {
        self.by_instance
            .get(instance_id)
            .and_then(|bindings| bindings.get(binding_id).cloned())
    }

    /// Removes one binding. Drops the per-instance group once it is empty.
    pub fn remove(&self, instance_id: &str, binding_id: &str) -> Option<ServiceBinding> {
        let removed = self
            .by_instance
            .get_mut(instance_id)
            .and_then(|mut bindings| bindings.remove(binding_id));
        self.by_instance
            .remove_if(instance_id, |_, bindings| bindings.is_empty());
        removed
    }

    /// Removes every binding of an instance and returns them.
    pub fn remove_all(&self, instance_id: &str) -> Vec<ServiceBinding> {
        self.by_instance
            .remove(instance_id)
            .map(|(_, bindings)| bindings.into_values().collect())
            .unwrap_or_default()
    }

    /// Number of bindings on one instance.
    #[must_use]
    pub fn count_for(&self, instance_id: &str) -> usize {
        self.by_instance
            .get(instance_id)
            .map_or(0, |bindings| bindings.len())
    }

    /// Total number of bindings across all instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_instance.iter().map(|entry| entry.value().len()).sum()
    }

    /// Whether no binding is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_instance.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use osbroker_core::{InstanceState, Parameters, ServiceInstance};
    use serde_json::json;

    use super::*;

    fn instances_with(ids: &[&str]) -> InstanceRegistry {
        let registry = InstanceRegistry::new(None);
        for id in ids {
            registry.try_reserve().unwrap().commit(ServiceInstance {
                instance_id: (*id).to_string(),
                service_id: "svc".to_string(),
                plan_id: "small".to_string(),
                parameters: Parameters::new(),
                dashboard_url: None,
                state: InstanceState::Ready,
            });
        }
        registry
    }

    fn binding(instance_id: &str, binding_id: &str) -> ServiceBinding {
        ServiceBinding {
            binding_id: binding_id.to_string(),
            instance_id: instance_id.to_string(),
            service_id: "svc".to_string(),
            plan_id: "small".to_string(),
            app_guid: None,
            parameters: Parameters::new(),
            credentials: json!({"password": "secret"}),
            syslog_drain_url: None,
            route_service_url: None,
            volume_mounts: Vec::new(),
        }
    }

    #[test]
    fn insert_requires_owning_instance() {
        let instances = instances_with(&[]);
        let bindings = BindingRegistry::new();

        let err = bindings.insert(&instances, binding("a", "b1")).unwrap_err();
        assert!(matches!(err, BrokerError::InstanceDoesNotExist { instance_id } if instance_id == "a"));
        assert!(bindings.is_empty());
    }

    #[test]
    fn binding_ids_are_scoped_per_instance() {
        let instances = instances_with(&["a", "b"]);
        let bindings = BindingRegistry::new();

        bindings.insert(&instances, binding("a", "shared")).unwrap();
        bindings.insert(&instances, binding("b", "shared")).unwrap();
        assert_eq!(bindings.len(), 2);

        let err = bindings.insert(&instances, binding("a", "shared")).unwrap_err();
        assert!(matches!(err, BrokerError::BindingAlreadyExists { .. }));
    }

    #[test]
    fn remove_drops_empty_groups() {
        let instances = instances_with(&["a"]);
        let bindings = BindingRegistry::new();
        bindings.insert(&instances, binding("a", "b1")).unwrap();

        assert!(bindings.remove("a", "b1").is_some());
        assert!(bindings.remove("a", "b1").is_none());
        assert!(bindings.is_empty());
        assert_eq!(bindings.count_for("a"), 0);
    }

    #[test]
    fn remove_all_cascades_one_instance_only() {
        let instances = instances_with(&["a", "b"]);
        let bindings = BindingRegistry::new();
        bindings.insert(&instances, binding("a", "b1")).unwrap();
        bindings.insert(&instances, binding("a", "b2")).unwrap();
        bindings.insert(&instances, binding("b", "b1")).unwrap();

        let mut removed: Vec<String> = bindings
            .remove_all("a")
            .into_iter()
            .map(|b| b.binding_id)
            .collect();
        removed.sort();

        assert_eq!(removed, vec!["b1", "b2"]);
        assert_eq!(bindings.count_for("a"), 0);
        assert!(bindings.get("b", "b1").is_some());
    }
}
