use std::time::Duration;

/// What a repeated Provision or Bind for an existing identifier does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Every duplicate identifier is a conflict.
    Conflict,
    /// A request identical to the original (same service, plan, and
    /// parameters) returns the original result; anything else conflicts.
    #[default]
    ReturnExisting,
}

/// What Deprovision does with the bindings of the instance it removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BindingCascade {
    /// Bindings are deleted together with their instance.
    #[default]
    Cascade,
    /// Deprovision fails with `InstanceHasBindings` while bindings exist.
    Reject,
}

/// Broker-level configuration: lifecycle policies, the instance ceiling,
/// pipeline concurrency, and background sweeping.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Maximum number of registered instances. `None` means unlimited.
    pub instance_limit: Option<usize>,
    pub duplicate_policy: DuplicatePolicy,
    pub binding_cascade: BindingCascade,
    /// Ask the driver to clean up when deprovisioning an unknown instance.
    pub cleanup_orphans: bool,
    /// Maximum number of concurrent mutations before load shedding. Catalog
    /// reads and `last_operation` polls do not count.
    pub max_concurrent_operations: u32,
    /// How long finished asynchronous operations stay pollable, in milliseconds.
    pub operation_retention_ms: u64,
    /// Interval between operation sweeps in milliseconds.
    pub sweep_interval_ms: u64,
}

impl BrokerConfig {
    #[must_use]
    pub fn operation_retention(&self) -> Duration {
        Duration::from_millis(self.operation_retention_ms)
    }

    /// Sweep period, never shorter than one millisecond.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            instance_limit: None,
            duplicate_policy: DuplicatePolicy::default(),
            binding_cascade: BindingCascade::default(),
            cleanup_orphans: true,
            max_concurrent_operations: 1000,
            operation_retention_ms: 3_600_000,
            sweep_interval_ms: 60_000,
        }
    }
}
