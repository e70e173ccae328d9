//! Instance registry: provisioning state per service-instance identifier.
//!
//! Backed by [`DashMap`] so lookups for unrelated instances never contend.
//! The instance ceiling is enforced with an atomic slot counter: a provision
//! first reserves a slot, calls the driver, and only then commits the
//! instance. Dropping an uncommitted [`SlotReservation`] releases the slot,
//! so concurrent provisions of distinct identifiers can never overshoot.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use osbroker_core::{BrokerError, InstanceState, Parameters, ServiceInstance};

/// Registry of provisioned service instances.
pub struct InstanceRegistry {
    instances: DashMap<String, ServiceInstance>,
    /// Committed instances plus outstanding reservations.
    occupied: AtomicUsize,
    limit: Option<usize>,
}

impl InstanceRegistry {
    /// Creates an empty registry. `None` means no ceiling.
    #[must_use]
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            instances: DashMap::new(),
            occupied: AtomicUsize::new(0),
            limit,
        }
    }

    /// The configured ceiling, if any.
    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Reserves room for one more instance.
    ///
    /// # Errors
    ///
    /// Returns `InstanceLimitReached` when committed instances plus in-flight
    /// reservations already meet the ceiling.
    pub fn try_reserve(&self) -> Result<SlotReservation<'_>, BrokerError> {
        let reserved = self
            .occupied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |occupied| match self.limit {
                Some(limit) if occupied >= limit => None,
                _ => Some(occupied + 1),
            });

        match reserved {
            Ok(_) => Ok(SlotReservation {
                registry: self,
                committed: false,
            }),
            Err(_) => Err(BrokerError::InstanceLimitReached {
                limit: self.limit.unwrap_or_default(),
            }),
        }
    }

    /// Returns a snapshot of the instance, if registered.
    #[must_use]
    pub fn get(&self, instance_id: &str) -> Option<ServiceInstance> {
        self.instances.get(instance_id).map(|entry| entry.clone())
    }

    /// Whether an instance is registered.
    #[must_use]
    pub fn contains(&self, instance_id: &str) -> bool {
        self.instances.contains_key(instance_id)
    }

    /// Moves an instance to a new lifecycle state. Returns `false` if the
    /// instance is not registered.
    pub fn set_state(&self, instance_id: &str, state: InstanceState) -> bool {
        self.instances
            .get_mut(instance_id)
            .map(|mut entry| entry.state = state)
            .is_some()
    }

    /// Applies the result of a successful update and marks the instance ready.
    /// Absent fields leave the current values in place.
    pub fn apply_update(
        &self,
        instance_id: &str,
        plan_id: Option<&str>,
        parameters: Option<&Parameters>,
        dashboard_url: Option<&str>,
    ) -> bool {
        self.instances
            .get_mut(instance_id)
            .map(|mut entry| {
                if let Some(plan_id) = plan_id {
                    entry.plan_id = plan_id.to_string();
                }
                if let Some(parameters) = parameters {
                    entry.parameters = parameters.clone();
                }
                if let Some(url) = dashboard_url {
                    entry.dashboard_url = Some(url.to_string());
                }
                entry.state = InstanceState::Ready;
            })
            .is_some()
    }

    /// Removes an instance and frees its slot.
    pub fn remove(&self, instance_id: &str) -> Option<ServiceInstance> {
        let removed = self.instances.remove(instance_id).map(|(_, instance)| instance);
        if removed.is_some() {
            self.occupied.fetch_sub(1, Ordering::AcqRel);
        }
        removed
    }

    /// Number of registered instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether no instance is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Identifiers of all registered instances, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

// ---------------------------------------------------------------------------
// SlotReservation
// ---------------------------------------------------------------------------

/// RAII claim on one instance slot.
///
/// Released on drop unless [`commit`](Self::commit) registered an instance.
#[derive(Debug)]
pub struct SlotReservation<'a> {
    registry: &'a InstanceRegistry,
    committed: bool,
}

impl SlotReservation<'_> {
    /// Registers the instance in the reserved slot.
    pub fn commit(mut self, instance: ServiceInstance) {
        let previous = self
            .registry
            .instances
            .insert(instance.instance_id.clone(), instance);
        // A replaced entry already owned a slot; keep the count exact.
        self.committed = previous.is_none();
    }
}

impl Drop for SlotReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.occupied.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("instances", &self.instances.len())
            .field("occupied", &self.occupied.load(Ordering::Relaxed))
            .field("limit", &self.limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str) -> ServiceInstance {
        ServiceInstance {
            instance_id: id.to_string(),
            service_id: "svc".to_string(),
            plan_id: "small".to_string(),
            parameters: Parameters::new(),
            dashboard_url: None,
            state: InstanceState::Ready,
        }
    }

    #[test]
    fn reserve_commit_and_remove() {
        let registry = InstanceRegistry::new(Some(2));
        registry.try_reserve().unwrap().commit(instance("a"));

        assert!(registry.contains("a"));
        assert_eq!(registry.len(), 1);

        let removed = registry.remove("a").unwrap();
        assert_eq!(removed.instance_id, "a");
        assert!(registry.is_empty());
        assert!(registry.remove("a").is_none());
    }

    #[test]
    fn limit_counts_outstanding_reservations() {
        let registry = InstanceRegistry::new(Some(1));
        let held = registry.try_reserve().unwrap();

        let err = registry.try_reserve().unwrap_err();
        assert!(matches!(err, BrokerError::InstanceLimitReached { limit: 1 }));

        drop(held);
        assert!(registry.try_reserve().is_ok());
    }

    #[test]
    fn removal_frees_a_slot() {
        let registry = InstanceRegistry::new(Some(1));
        registry.try_reserve().unwrap().commit(instance("a"));
        assert!(registry.try_reserve().is_err());

        registry.remove("a");
        registry.try_reserve().unwrap().commit(instance("b"));
        assert_eq!(registry.ids(), vec!["b".to_string()]);
    }

    #[test]
    fn unlimited_registry_never_rejects() {
        let registry = InstanceRegistry::new(None);
        for i in 0..100 {
            registry.try_reserve().unwrap().commit(instance(&format!("i-{i}")));
        }
        assert_eq!(registry.len(), 100);
    }

    #[test]
    fn apply_update_keeps_absent_fields() {
        let registry = InstanceRegistry::new(None);
        let mut updating = instance("a");
        updating.state = InstanceState::Updating;
        registry.try_reserve().unwrap().commit(updating);

        assert!(registry.apply_update("a", Some("large"), None, None));

        let updated = registry.get("a").unwrap();
        assert_eq!(updated.plan_id, "large");
        assert!(updated.parameters.is_empty());
        assert_eq!(updated.state, InstanceState::Ready);
        assert!(!registry.apply_update("missing", Some("large"), None, None));
    }

    #[test]
    fn set_state_on_unknown_instance_is_a_no_op() {
        let registry = InstanceRegistry::new(None);
        assert!(!registry.set_state("missing", InstanceState::Failed));
    }
}
