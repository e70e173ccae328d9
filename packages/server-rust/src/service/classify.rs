//! Request classification: converts a decoded `BrokerRequest` into a typed
//! `Operation`.

use std::sync::atomic::{AtomicU64, Ordering};

use super::operation::{verbs, BrokerRequest, ClassifyError, Operation, OperationContext};

// ---------------------------------------------------------------------------
// OperationService
// ---------------------------------------------------------------------------

/// Classifies incoming requests into typed `Operation` values.
///
/// Each call gets a unique call id. Required identifiers are validated here so
/// the broker core only ever sees well-formed operations.
#[derive(Debug)]
pub struct OperationService {
    call_id_counter: AtomicU64,
}

impl Default for OperationService {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            call_id_counter: AtomicU64::new(1),
        }
    }

    fn next_call_id(&self) -> u64 {
        self.call_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn make_ctx(&self, verb: &'static str, request_id: Option<String>) -> OperationContext {
        let mut ctx = OperationContext::new(self.next_call_id(), verb);
        ctx.request_id = request_id;
        ctx
    }

    /// Classify a request into an `Operation`.
    ///
    /// # Errors
    ///
    /// - `ClassifyError::EmptyIdentifier` for an empty instance or binding id
    /// - `ClassifyError::MissingField` when `service_id` or `plan_id` is
    ///   missing where the protocol requires it
    pub fn classify(
        &self,
        request: BrokerRequest,
        request_id: Option<String>,
    ) -> Result<Operation, ClassifyError> {
        match request {
            BrokerRequest::Catalog => Ok(Operation::Catalog {
                ctx: self.make_ctx(verbs::CATALOG, request_id),
            }),
            BrokerRequest::Provision {
                instance_id,
                details,
                accepts_incomplete,
            } => {
                require_id("instance_id", &instance_id)?;
                require_field("service_id", &details.service_id)?;
                require_field("plan_id", &details.plan_id)?;
                Ok(Operation::Provision {
                    ctx: self.make_ctx(verbs::PROVISION, request_id),
                    instance_id,
                    details,
                    accepts_incomplete,
                })
            }
            BrokerRequest::Update {
                instance_id,
                details,
                accepts_incomplete,
            } => {
                require_id("instance_id", &instance_id)?;
                require_field("service_id", &details.service_id)?;
                if details.plan_id.as_deref() == Some("") {
                    return Err(ClassifyError::EmptyIdentifier { field: "plan_id" });
                }
                Ok(Operation::Update {
                    ctx: self.make_ctx(verbs::UPDATE, request_id),
                    instance_id,
                    details,
                    accepts_incomplete,
                })
            }
            BrokerRequest::Deprovision {
                instance_id,
                details,
                accepts_incomplete,
            } => {
                require_id("instance_id", &instance_id)?;
                require_field("service_id", &details.service_id)?;
                require_field("plan_id", &details.plan_id)?;
                Ok(Operation::Deprovision {
                    ctx: self.make_ctx(verbs::DEPROVISION, request_id),
                    instance_id,
                    details,
                    accepts_incomplete,
                })
            }
            BrokerRequest::Bind {
                instance_id,
                binding_id,
                details,
            } => {
                require_id("instance_id", &instance_id)?;
                require_id("binding_id", &binding_id)?;
                require_field("service_id", &details.service_id)?;
                require_field("plan_id", &details.plan_id)?;
                Ok(Operation::Bind {
                    ctx: self.make_ctx(verbs::BIND, request_id),
                    instance_id,
                    binding_id,
                    details,
                })
            }
            BrokerRequest::Unbind {
                instance_id,
                binding_id,
                details,
            } => {
                require_id("instance_id", &instance_id)?;
                require_id("binding_id", &binding_id)?;
                require_field("service_id", &details.service_id)?;
                require_field("plan_id", &details.plan_id)?;
                Ok(Operation::Unbind {
                    ctx: self.make_ctx(verbs::UNBIND, request_id),
                    instance_id,
                    binding_id,
                    details,
                })
            }
            BrokerRequest::LastOperation {
                instance_id,
                operation,
            } => {
                require_id("instance_id", &instance_id)?;
                Ok(Operation::LastOperation {
                    ctx: self.make_ctx(verbs::LAST_OPERATION, request_id),
                    instance_id,
                    operation: operation.filter(|token| !token.is_empty()),
                })
            }
        }
    }
}

fn require_id(field: &'static str, value: &str) -> Result<(), ClassifyError> {
    if value.trim().is_empty() {
        Err(ClassifyError::EmptyIdentifier { field })
    } else {
        Ok(())
    }
}

fn require_field(field: &'static str, value: &str) -> Result<(), ClassifyError> {
    if value.is_empty() {
        Err(ClassifyError::MissingField { field })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use osbroker_core::{BindDetails, DeprovisionDetails, ProvisionDetails};

    use super::*;

    fn provision(instance_id: &str, service_id: &str, plan_id: &str) -> BrokerRequest {
        BrokerRequest::Provision {
            instance_id: instance_id.to_string(),
            details: ProvisionDetails {
                service_id: service_id.to_string(),
                plan_id: plan_id.to_string(),
                ..ProvisionDetails::default()
            },
            accepts_incomplete: true,
        }
    }

    #[test]
    fn call_ids_are_unique_and_increasing() {
        let svc = OperationService::new();
        let first = svc.classify(BrokerRequest::Catalog, None).unwrap();
        let second = svc.classify(BrokerRequest::Catalog, None).unwrap();
        assert!(second.ctx().call_id > first.ctx().call_id);
    }

    #[test]
    fn provision_requires_service_and_plan() {
        let svc = OperationService::new();
        assert_eq!(
            svc.classify(provision("a", "", "small"), None).unwrap_err(),
            ClassifyError::MissingField { field: "service_id" }
        );
        assert_eq!(
            svc.classify(provision("a", "db", ""), None).unwrap_err(),
            ClassifyError::MissingField { field: "plan_id" }
        );

        let op = svc
            .classify(provision("a", "db", "small"), Some("req-1".to_string()))
            .unwrap();
        assert_eq!(op.ctx().verb, verbs::PROVISION);
        assert_eq!(op.ctx().request_id.as_deref(), Some("req-1"));
        assert!(matches!(op, Operation::Provision { accepts_incomplete: true, .. }));
    }

    #[test]
    fn blank_identifiers_are_rejected() {
        let svc = OperationService::new();
        assert_eq!(
            svc.classify(provision("  ", "db", "small"), None).unwrap_err(),
            ClassifyError::EmptyIdentifier { field: "instance_id" }
        );

        let bind = BrokerRequest::Bind {
            instance_id: "a".to_string(),
            binding_id: String::new(),
            details: BindDetails {
                service_id: "db".to_string(),
                plan_id: "small".to_string(),
                ..BindDetails::default()
            },
        };
        assert_eq!(
            svc.classify(bind, None).unwrap_err(),
            ClassifyError::EmptyIdentifier { field: "binding_id" }
        );
    }

    #[test]
    fn deprovision_requires_query_parameters() {
        let svc = OperationService::new();
        let request = BrokerRequest::Deprovision {
            instance_id: "a".to_string(),
            details: DeprovisionDetails {
                service_id: "db".to_string(),
                plan_id: String::new(),
            },
            accepts_incomplete: false,
        };
        assert_eq!(
            svc.classify(request, None).unwrap_err(),
            ClassifyError::MissingField { field: "plan_id" }
        );
    }

    #[test]
    fn empty_operation_token_means_no_token() {
        let svc = OperationService::new();
        let op = svc
            .classify(
                BrokerRequest::LastOperation {
                    instance_id: "a".to_string(),
                    operation: Some(String::new()),
                },
                None,
            )
            .unwrap();
        assert!(matches!(op, Operation::LastOperation { operation: None, .. }));
    }
}
