//! Broker core: the instance and binding lifecycle state machine.
//!
//! Every mutating verb runs under the lock of its instance, checks the
//! registries, asks the driver to do the work exactly once, and records the
//! outcome. Asynchronous work is tracked by the [`OperationTracker`] and
//! finished by a terminal `last_operation` poll.

use std::sync::Arc;

use osbroker_core::{
    BindDetails, BindResponse, BindingSpec, BrokerError, Catalog, Completion, CompletionMode,
    DeprovisionDetails,
    DeprovisionResponse, DriverError, InstanceState, LastOperation, OperationKind, OperationRef,
    OperationState, ProvisionDetails, ProvisionResponse, ServiceBinding, ServiceDriver,
    ServiceInstance, UnbindDetails, UpdateDetails, UpdateResponse,
};
use tracing::{debug, info, warn};

use super::config::{BindingCascade, BrokerConfig, DuplicatePolicy};
use crate::registry::{
    BindingRegistry, InstanceLocks, InstanceRegistry, OperationTracker, PendingUpdate,
    TrackedOperation,
};

/// Point-in-time counts, reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BrokerStats {
    pub instances: usize,
    pub bindings: usize,
    pub active_operations: usize,
}

/// Orchestrates the six lifecycle operations over the registries and driver.
pub struct BrokerCore {
    config: Arc<BrokerConfig>,
    catalog: Arc<Catalog>,
    driver: Arc<dyn ServiceDriver>,
    instances: InstanceRegistry,
    bindings: BindingRegistry,
    operations: Arc<OperationTracker>,
    locks: InstanceLocks,
}

impl BrokerCore {
    #[must_use]
    pub fn new(
        config: Arc<BrokerConfig>,
        catalog: Arc<Catalog>,
        driver: Arc<dyn ServiceDriver>,
    ) -> Self {
        Self {
            instances: InstanceRegistry::new(config.instance_limit),
            bindings: BindingRegistry::new(),
            operations: Arc::new(OperationTracker::new()),
            locks: InstanceLocks::new(),
            config,
            catalog,
            driver,
        }
    }

    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// The catalog served by `GET /v2/catalog`.
    #[must_use]
    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog)
    }

    #[must_use]
    pub fn instances(&self) -> &InstanceRegistry {
        &self.instances
    }

    #[must_use]
    pub fn bindings(&self) -> &BindingRegistry {
        &self.bindings
    }

    #[must_use]
    pub fn operations(&self) -> &OperationTracker {
        &self.operations
    }

    /// Shared handle on the tracker, for the background sweeper.
    #[must_use]
    pub fn shared_operations(&self) -> Arc<OperationTracker> {
        Arc::clone(&self.operations)
    }

    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            instances: self.instances.len(),
            bindings: self.bindings.len(),
            active_operations: self.operations.active_count(),
        }
    }

    // -----------------------------------------------------------------------
    // Provision
    // -----------------------------------------------------------------------

    /// Creates a new service instance.
    ///
    /// # Errors
    ///
    /// `UnknownPlan`, `InstanceAlreadyExists`, `OperationInProgress`,
    /// `InstanceLimitReached`, `AsyncRequired`, or a driver failure.
    pub async fn provision(
        &self,
        instance_id: &str,
        details: &ProvisionDetails,
        accepts_incomplete: bool,
    ) -> Result<ProvisionResponse, BrokerError> {
        if self.catalog.plan(&details.service_id, &details.plan_id).is_none() {
            return Err(BrokerError::UnknownPlan {
                service_id: details.service_id.clone(),
                plan_id: details.plan_id.clone(),
            });
        }

        let _guard = self.locks.lock(instance_id).await;

        if let Some(existing) = self.instances.get(instance_id) {
            return self.replay_provision(&existing, details);
        }

        let reservation = self.instances.try_reserve()?;
        let mode = self.completion_mode(OperationKind::Provision, accepts_incomplete)?;
        let outcome = self
            .driver
            .provision(instance_id, details, accepts_incomplete)
            .await
            .map_err(|err| driver_failure("provision", instance_id, err))?;
        check_completion(
            OperationKind::Provision,
            instance_id,
            mode,
            accepts_incomplete,
            &outcome.completion,
        )?;

        let mut instance = ServiceInstance {
            instance_id: instance_id.to_string(),
            service_id: details.service_id.clone(),
            plan_id: details.plan_id.clone(),
            parameters: details.parameters.clone(),
            dashboard_url: outcome.dashboard_url.clone(),
            state: InstanceState::Ready,
        };

        match outcome.completion {
            Completion::Synchronous => {
                self.operations.forget(instance_id);
                reservation.commit(instance);
                info!(instance_id, plan_id = %details.plan_id, "instance provisioned");
                Ok(ProvisionResponse {
                    dashboard_url: outcome.dashboard_url,
                    ..ProvisionResponse::default()
                })
            }
            Completion::Asynchronous { operation_data } => {
                let token =
                    self.operations
                        .begin(instance_id, OperationKind::Provision, operation_data, None)?;
                instance.state = InstanceState::Provisioning;
                reservation.commit(instance);
                info!(instance_id, operation = %token, "instance provisioning started");
                Ok(ProvisionResponse {
                    dashboard_url: outcome.dashboard_url,
                    operation: Some(token),
                    is_async: true,
                    already_exists: false,
                })
            }
        }
    }

    fn replay_provision(
        &self,
        existing: &ServiceInstance,
        details: &ProvisionDetails,
    ) -> Result<ProvisionResponse, BrokerError> {
        let instance_id = existing.instance_id.as_str();
        let identical = self.config.duplicate_policy == DuplicatePolicy::ReturnExisting
            && existing.matches(&details.service_id, &details.plan_id, &details.parameters);
        if !identical {
            return Err(BrokerError::InstanceAlreadyExists {
                instance_id: instance_id.to_string(),
            });
        }

        match self.operations.active(instance_id) {
            Some(op) if op.kind == OperationKind::Provision => {
                debug!(instance_id, operation = %op.token, "replaying in-progress provision");
                Ok(ProvisionResponse {
                    dashboard_url: existing.dashboard_url.clone(),
                    operation: Some(op.token),
                    is_async: true,
                    already_exists: true,
                })
            }
            Some(op) => Err(BrokerError::OperationInProgress {
                instance_id: instance_id.to_string(),
                kind: op.kind,
            }),
            // A failed provision is not a usable instance; it has to be
            // deprovisioned before the id can be provisioned again.
            None if existing.state == InstanceState::Failed => {
                Err(BrokerError::InstanceAlreadyExists {
                    instance_id: instance_id.to_string(),
                })
            }
            None => {
                debug!(instance_id, "replaying completed provision");
                Ok(ProvisionResponse {
                    dashboard_url: existing.dashboard_url.clone(),
                    operation: None,
                    is_async: false,
                    already_exists: true,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------------

    /// Changes the plan or parameters of an instance.
    ///
    /// # Errors
    ///
    /// `InstanceDoesNotExist`, `InstanceFailed`, `OperationInProgress`,
    /// `UnknownPlan`, `PlanChangeNotSupported`, `AsyncRequired`, or a driver
    /// failure.
    pub async fn update(
        &self,
        instance_id: &str,
        details: &UpdateDetails,
        accepts_incomplete: bool,
    ) -> Result<UpdateResponse, BrokerError> {
        let _guard = self.locks.lock(instance_id).await;

        let instance = self.require_usable_instance(instance_id)?;

        if let Some(plan_id) = details
            .plan_id
            .as_deref()
            .filter(|plan_id| *plan_id != instance.plan_id)
        {
            let Some((service, _)) = self.catalog.plan(&instance.service_id, plan_id) else {
                return Err(BrokerError::UnknownPlan {
                    service_id: instance.service_id.clone(),
                    plan_id: plan_id.to_string(),
                });
            };
            if !service.plan_updateable {
                return Err(BrokerError::PlanChangeNotSupported {
                    service_id: instance.service_id.clone(),
                });
            }
        }

        let mode = self.completion_mode(OperationKind::Update, accepts_incomplete)?;
        let outcome = self
            .driver
            .update(instance_id, details, accepts_incomplete)
            .await
            .map_err(|err| driver_failure("update", instance_id, err))?;
        check_completion(
            OperationKind::Update,
            instance_id,
            mode,
            accepts_incomplete,
            &outcome.completion,
        )?;

        match outcome.completion {
            Completion::Synchronous => {
                self.instances.apply_update(
                    instance_id,
                    details.plan_id.as_deref(),
                    details.parameters.as_ref(),
                    outcome.dashboard_url.as_deref(),
                );
                info!(instance_id, "instance updated");
                Ok(UpdateResponse {
                    dashboard_url: outcome.dashboard_url,
                    ..UpdateResponse::default()
                })
            }
            Completion::Asynchronous { operation_data } => {
                let pending = PendingUpdate {
                    plan_id: details.plan_id.clone(),
                    parameters: details.parameters.clone(),
                    dashboard_url: outcome.dashboard_url.clone(),
                };
                let token = self.operations.begin(
                    instance_id,
                    OperationKind::Update,
                    operation_data,
                    Some(pending),
                )?;
                self.instances.set_state(instance_id, InstanceState::Updating);
                info!(instance_id, operation = %token, "instance update started");
                Ok(UpdateResponse {
                    dashboard_url: outcome.dashboard_url,
                    operation: Some(token),
                    is_async: true,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Deprovision
    // -----------------------------------------------------------------------

    /// Destroys an instance, cascading to its bindings.
    ///
    /// # Errors
    ///
    /// `InstanceDoesNotExist`, `OperationInProgress`, `InstanceHasBindings`,
    /// `AsyncRequired`, or a driver failure. No state changes on error.
    pub async fn deprovision(
        &self,
        instance_id: &str,
        details: &DeprovisionDetails,
        accepts_incomplete: bool,
    ) -> Result<DeprovisionResponse, BrokerError> {
        let _guard = self.locks.lock(instance_id).await;

        if !self.instances.contains(instance_id) {
            if self.config.cleanup_orphans {
                self.cleanup_orphan(instance_id, details, accepts_incomplete)
                    .await;
            }
            return Err(BrokerError::InstanceDoesNotExist {
                instance_id: instance_id.to_string(),
            });
        }
        self.operations.ensure_idle(instance_id)?;

        let bound = self.bindings.count_for(instance_id);
        if bound > 0 && self.config.binding_cascade == BindingCascade::Reject {
            return Err(BrokerError::InstanceHasBindings {
                instance_id: instance_id.to_string(),
                bindings: bound,
            });
        }

        let mode = self.completion_mode(OperationKind::Deprovision, accepts_incomplete)?;
        let completion = self
            .driver
            .deprovision(instance_id, details, accepts_incomplete)
            .await
            .map_err(|err| driver_failure("deprovision", instance_id, err))?;
        check_completion(
            OperationKind::Deprovision,
            instance_id,
            mode,
            accepts_incomplete,
            &completion,
        )?;

        match completion {
            Completion::Synchronous => {
                self.operations.forget(instance_id);
                self.remove_instance(instance_id);
                Ok(DeprovisionResponse::default())
            }
            Completion::Asynchronous { operation_data } => {
                let token = self.operations.begin(
                    instance_id,
                    OperationKind::Deprovision,
                    operation_data,
                    None,
                )?;
                self.instances
                    .set_state(instance_id, InstanceState::Deprovisioning);
                info!(instance_id, operation = %token, "instance deprovisioning started");
                Ok(DeprovisionResponse {
                    operation: Some(token),
                    is_async: true,
                })
            }
        }
    }

    async fn cleanup_orphan(
        &self,
        instance_id: &str,
        details: &DeprovisionDetails,
        accepts_incomplete: bool,
    ) {
        match self
            .driver
            .deprovision(instance_id, details, accepts_incomplete)
            .await
        {
            Ok(_) => debug!(instance_id, "orphan cleanup requested for unknown instance"),
            Err(err) => warn!(instance_id, error = %err, "orphan cleanup failed"),
        }
    }

    fn remove_instance(&self, instance_id: &str) {
        self.instances.remove(instance_id);
        let cascaded = self.bindings.remove_all(instance_id).len();
        info!(instance_id, cascaded_bindings = cascaded, "instance deprovisioned");
    }

    // -----------------------------------------------------------------------
    // Bind / Unbind
    // -----------------------------------------------------------------------

    /// Creates credentials for an application.
    ///
    /// # Errors
    ///
    /// `InstanceDoesNotExist`, `InstanceFailed`, `OperationInProgress`,
    /// `BindingAlreadyExists`, or a driver failure.
    pub async fn bind(
        &self,
        instance_id: &str,
        binding_id: &str,
        details: &BindDetails,
    ) -> Result<BindResponse, BrokerError> {
        let _guard = self.locks.lock(instance_id).await;

        self.require_usable_instance(instance_id)?;

        if let Some(existing) = self.bindings.get(instance_id, binding_id) {
            let identical = self.config.duplicate_policy == DuplicatePolicy::ReturnExisting
                && existing.matches(
                    &details.service_id,
                    &details.plan_id,
                    details.app_guid(),
                    &details.parameters,
                );
            if !identical {
                return Err(BrokerError::BindingAlreadyExists {
                    instance_id: instance_id.to_string(),
                    binding_id: binding_id.to_string(),
                });
            }
            debug!(instance_id, binding_id, "replaying completed bind");
            return Ok(BindResponse {
                binding: BindingSpec {
                    credentials: existing.credentials,
                    syslog_drain_url: existing.syslog_drain_url,
                    route_service_url: existing.route_service_url,
                    volume_mounts: existing.volume_mounts,
                },
                already_exists: true,
            });
        }

        let spec = self
            .driver
            .bind(instance_id, binding_id, details)
            .await
            .map_err(|err| driver_failure("bind", instance_id, err))?;

        self.bindings.insert(
            &self.instances,
            ServiceBinding {
                binding_id: binding_id.to_string(),
                instance_id: instance_id.to_string(),
                service_id: details.service_id.clone(),
                plan_id: details.plan_id.clone(),
                app_guid: details.app_guid().map(str::to_string),
                parameters: details.parameters.clone(),
                credentials: spec.credentials.clone(),
                syslog_drain_url: spec.syslog_drain_url.clone(),
                route_service_url: spec.route_service_url.clone(),
                volume_mounts: spec.volume_mounts.clone(),
            },
        )?;
        info!(instance_id, binding_id, "binding created");

        Ok(BindResponse {
            binding: spec,
            already_exists: false,
        })
    }

    /// Revokes a binding.
    ///
    /// # Errors
    ///
    /// `InstanceDoesNotExist`, `OperationInProgress`, `BindingDoesNotExist`,
    /// or a driver failure.
    pub async fn unbind(
        &self,
        instance_id: &str,
        binding_id: &str,
        details: &UnbindDetails,
    ) -> Result<(), BrokerError> {
        let _guard = self.locks.lock(instance_id).await;

        self.require_instance(instance_id)?;
        self.operations.ensure_idle(instance_id)?;
        if self.bindings.get(instance_id, binding_id).is_none() {
            return Err(BrokerError::BindingDoesNotExist {
                instance_id: instance_id.to_string(),
                binding_id: binding_id.to_string(),
            });
        }

        self.driver
            .unbind(instance_id, binding_id, details)
            .await
            .map_err(|err| driver_failure("unbind", instance_id, err))?;

        self.bindings.remove(instance_id, binding_id);
        info!(instance_id, binding_id, "binding removed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // LastOperation
    // -----------------------------------------------------------------------

    /// Reports the status of the asynchronous operation on an instance.
    ///
    /// Finished operations are answered from the tracker without calling the
    /// driver. A poll that observes the terminal transition applies its effect
    /// to the instance under the instance lock, exactly once.
    ///
    /// # Errors
    ///
    /// `OperationNotFound` when nothing matching is tracked, or a driver
    /// failure from the poll.
    pub async fn last_operation(
        &self,
        instance_id: &str,
        token: Option<&str>,
    ) -> Result<LastOperation, BrokerError> {
        let tracked = self.operations.lookup(instance_id, token)?;
        if !tracked.is_active() {
            debug!(instance_id, operation = %tracked.token, state = tracked.state.as_str(), "answering finished operation");
            return Ok(tracked.last_operation());
        }

        let status = self
            .driver
            .poll(
                instance_id,
                OperationRef {
                    kind: tracked.kind,
                    token: &tracked.token,
                    operation_data: tracked.operation_data.as_deref(),
                },
            )
            .await
            .map_err(|err| driver_failure("poll", instance_id, err))?;

        if !status.state.is_terminal() {
            debug!(instance_id, operation = %tracked.token, "operation still in progress");
            self.operations
                .refresh(instance_id, &tracked.token, status.description.clone());
            return Ok(status);
        }

        let _guard = self.locks.lock(instance_id).await;
        let still_current = self
            .operations
            .active(instance_id)
            .is_some_and(|op| op.token == tracked.token);
        if still_current {
            self.apply_terminal(&tracked, status.state);
            self.operations.finish(instance_id, &tracked.token, &status);
        }
        Ok(status)
    }

    fn apply_terminal(&self, op: &TrackedOperation, state: OperationState) {
        let instance_id = op.instance_id.as_str();
        let kind = op.kind.as_str();
        match (op.kind, state) {
            (_, OperationState::InProgress) => {}
            (OperationKind::Provision, OperationState::Succeeded) => {
                self.instances.set_state(instance_id, InstanceState::Ready);
                info!(instance_id, kind, "instance provisioned");
            }
            (OperationKind::Provision, OperationState::Failed) => {
                self.instances.set_state(instance_id, InstanceState::Failed);
                warn!(instance_id, kind, "asynchronous provision failed");
            }
            (OperationKind::Update, OperationState::Succeeded) => {
                let pending = op.pending_update.clone().unwrap_or_default();
                self.instances.apply_update(
                    instance_id,
                    pending.plan_id.as_deref(),
                    pending.parameters.as_ref(),
                    pending.dashboard_url.as_deref(),
                );
                info!(instance_id, kind, "instance updated");
            }
            (OperationKind::Update | OperationKind::Deprovision, OperationState::Failed) => {
                self.instances.set_state(instance_id, InstanceState::Ready);
                warn!(instance_id, kind, "asynchronous operation failed");
            }
            (OperationKind::Deprovision, OperationState::Succeeded) => {
                self.remove_instance(instance_id);
            }
        }
    }

    fn require_instance(&self, instance_id: &str) -> Result<ServiceInstance, BrokerError> {
        self.instances
            .get(instance_id)
            .ok_or_else(|| BrokerError::InstanceDoesNotExist {
                instance_id: instance_id.to_string(),
            })
    }

    /// An idle instance that update and bind may act on. A failed provision
    /// leaves nothing to change or bind to; only deprovision clears it.
    fn require_usable_instance(&self, instance_id: &str) -> Result<ServiceInstance, BrokerError> {
        let instance = self.require_instance(instance_id)?;
        self.operations.ensure_idle(instance_id)?;
        if instance.state == InstanceState::Failed {
            debug!(instance_id, "rejecting request against failed instance");
            return Err(BrokerError::InstanceFailed {
                instance_id: instance_id.to_string(),
            });
        }
        Ok(instance)
    }

    /// Driver completion mode for `kind`, or `AsyncRequired` when the caller
    /// cannot accept the only way the driver completes it.
    fn completion_mode(
        &self,
        kind: OperationKind,
        accepts_incomplete: bool,
    ) -> Result<CompletionMode, BrokerError> {
        let mode = self.driver.capabilities().mode(kind);
        if mode.admits(accepts_incomplete) {
            Ok(mode)
        } else {
            Err(BrokerError::AsyncRequired)
        }
    }
}

impl std::fmt::Debug for BrokerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerCore")
            .field("config", &self.config)
            .field("instances", &self.instances)
            .field("bindings", &self.bindings.len())
            .field("operations", &self.operations.len())
            .finish_non_exhaustive()
    }
}

fn driver_failure(verb: &'static str, instance_id: &str, err: DriverError) -> BrokerError {
    match &err {
        DriverError::AsyncRequired => {
            debug!(instance_id, verb, "driver requires asynchronous completion");
        }
        DriverError::Failed(cause) => {
            warn!(instance_id, verb, error = %cause, "driver call failed");
        }
    }
    err.into()
}

fn check_completion(
    kind: OperationKind,
    instance_id: &str,
    mode: CompletionMode,
    accepts_incomplete: bool,
    completion: &Completion,
) -> Result<(), BrokerError> {
    if !completion.is_async() || mode.allows_async(accepts_incomplete) {
        return Ok(());
    }
    warn!(instance_id, kind = kind.as_str(), "driver answered asynchronously where it may not");
    Err(BrokerError::Driver(DriverError::failed(format!(
        "driver returned asynchronous completion for a {kind} that must complete synchronously"
    ))))
}
