//! Error taxonomy shared by the broker core and its transport.
//!
//! Every [`BrokerError`] maps to a stable [`ErrorKind`] so the transport can
//! translate it into a distinguishable protocol signal, and so the orchestrator
//! can decide whether a retry makes sense.

use crate::types::OperationKind;

/// Failure reported by a backing-service driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The driver can only complete this request asynchronously.
    #[error("the backing service requires asynchronous completion")]
    AsyncRequired,
    /// Any other driver failure. Passed through opaquely.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl DriverError {
    /// Convenience constructor for an opaque failure with a message.
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(anyhow::anyhow!("{message}"))
    }
}

/// Stable, machine-readable classification of a [`BrokerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InstanceAlreadyExists,
    InstanceDoesNotExist,
    InstanceLimitReached,
    InstanceHasBindings,
    InstanceFailed,
    BindingAlreadyExists,
    BindingDoesNotExist,
    AsyncRequired,
    OperationNotFound,
    OperationInProgress,
    UnknownPlan,
    PlanChangeNotSupported,
    Driver,
}

impl ErrorKind {
    /// Snake-case name of the kind, stable across releases.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InstanceAlreadyExists => "instance_already_exists",
            Self::InstanceDoesNotExist => "instance_does_not_exist",
            Self::InstanceLimitReached => "instance_limit_reached",
            Self::InstanceHasBindings => "instance_has_bindings",
            Self::InstanceFailed => "instance_failed",
            Self::BindingAlreadyExists => "binding_already_exists",
            Self::BindingDoesNotExist => "binding_does_not_exist",
            Self::AsyncRequired => "async_required",
            Self::OperationNotFound => "operation_not_found",
            Self::OperationInProgress => "operation_in_progress",
            Self::UnknownPlan => "unknown_plan",
            Self::PlanChangeNotSupported => "plan_change_not_supported",
            Self::Driver => "driver_failure",
        }
    }
}

/// Errors returned by the six lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("instance {instance_id} already exists with different details")]
    InstanceAlreadyExists { instance_id: String },

    #[error("instance {instance_id} does not exist")]
    InstanceDoesNotExist { instance_id: String },

    #[error("instance limit of {limit} reached")]
    InstanceLimitReached { limit: usize },

    #[error("instance {instance_id} still has {bindings} binding(s)")]
    InstanceHasBindings { instance_id: String, bindings: usize },

    #[error("instance {instance_id} failed to provision and must be deprovisioned")]
    InstanceFailed { instance_id: String },

    #[error("binding {binding_id} on instance {instance_id} already exists with different details")]
    BindingAlreadyExists {
        instance_id: String,
        binding_id: String,
    },

    #[error("binding {binding_id} on instance {instance_id} does not exist")]
    BindingDoesNotExist {
        instance_id: String,
        binding_id: String,
    },

    #[error("this service plan requires client support for asynchronous service operations")]
    AsyncRequired,

    #[error("no asynchronous operation is tracked for instance {instance_id}")]
    OperationNotFound { instance_id: String },

    #[error("a {kind} operation is still in progress on instance {instance_id}")]
    OperationInProgress {
        instance_id: String,
        kind: OperationKind,
    },

    #[error("plan {plan_id} is not offered by service {service_id}")]
    UnknownPlan { service_id: String, plan_id: String },

    #[error("service {service_id} does not support plan changes")]
    PlanChangeNotSupported { service_id: String },

    #[error("driver failure: {0}")]
    Driver(DriverError),
}

impl BrokerError {
    /// Stable classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InstanceAlreadyExists { .. } => ErrorKind::InstanceAlreadyExists,
            Self::InstanceDoesNotExist { .. } => ErrorKind::InstanceDoesNotExist,
            Self::InstanceLimitReached { .. } => ErrorKind::InstanceLimitReached,
            Self::InstanceHasBindings { .. } => ErrorKind::InstanceHasBindings,
            Self::InstanceFailed { .. } => ErrorKind::InstanceFailed,
            Self::BindingAlreadyExists { .. } => ErrorKind::BindingAlreadyExists,
            Self::BindingDoesNotExist { .. } => ErrorKind::BindingDoesNotExist,
            Self::AsyncRequired => ErrorKind::AsyncRequired,
            Self::OperationNotFound { .. } => ErrorKind::OperationNotFound,
            Self::OperationInProgress { .. } => ErrorKind::OperationInProgress,
            Self::UnknownPlan { .. } => ErrorKind::UnknownPlan,
            Self::PlanChangeNotSupported { .. } => ErrorKind::PlanChangeNotSupported,
            Self::Driver(_) => ErrorKind::Driver,
        }
    }

    /// Whether reissuing the same request unchanged can succeed later.
    ///
    /// `AsyncRequired` is not retryable as-is: the caller has to reissue with
    /// asynchronous completion accepted.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InstanceLimitReached { .. }
                | Self::InstanceHasBindings { .. }
                | Self::OperationInProgress { .. }
                | Self::Driver(DriverError::Failed(_))
        )
    }
}

impl From<DriverError> for BrokerError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::AsyncRequired => Self::AsyncRequired,
            other @ DriverError::Failed(_) => Self::Driver(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_async_required_surfaces_as_broker_async_required() {
        let err = BrokerError::from(DriverError::AsyncRequired);
        assert!(matches!(err, BrokerError::AsyncRequired));
        assert_eq!(err.kind().as_str(), "async_required");
        assert!(!err.is_retryable());
    }

    #[test]
    fn driver_failures_pass_through_opaquely() {
        let err = BrokerError::from(DriverError::failed("disk full"));
        assert_eq!(err.kind(), ErrorKind::Driver);
        assert_eq!(err.to_string(), "driver failure: disk full");
        assert!(err.is_retryable());
    }

    #[test]
    fn conflicts_are_not_retryable() {
        let err = BrokerError::InstanceAlreadyExists {
            instance_id: "a".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.kind().as_str(), "instance_already_exists");
    }

    #[test]
    fn failed_instances_need_a_deprovision_not_a_retry() {
        let err = BrokerError::InstanceFailed {
            instance_id: "a".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.kind().as_str(), "instance_failed");
        assert_eq!(
            err.to_string(),
            "instance a failed to provision and must be deprovisioned"
        );
    }

    #[test]
    fn operation_in_progress_names_the_verb() {
        let err = BrokerError::OperationInProgress {
            instance_id: "a".to_string(),
            kind: OperationKind::Deprovision,
        };
        assert_eq!(
            err.to_string(),
            "a deprovision operation is still in progress on instance a"
        );
    }
}
