//! Domain service: dispatches classified operations to the broker core.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::Service;

use crate::service::broker::BrokerCore;
use crate::service::operation::{Operation, OperationError, OperationResponse};

/// `tower::Service<Operation>` over a shared [`BrokerCore`].
///
/// Cheap to clone; every clone drives the same registries.
#[derive(Debug, Clone)]
pub struct BrokerService {
    core: Arc<BrokerCore>,
}

impl BrokerService {
    #[must_use]
    pub fn new(core: Arc<BrokerCore>) -> Self {
        Self { core }
    }

    #[must_use]
    pub fn core(&self) -> &Arc<BrokerCore> {
        &self.core
    }
}

impl Service<Operation> for BrokerService {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let core = Arc::clone(&self.core);
        Box::pin(async move {
            let response = match op {
                Operation::Catalog { .. } => OperationResponse::Catalog(core.catalog()),
                Operation::Provision {
                    instance_id,
                    details,
                    accepts_incomplete,
                    ..
                } => OperationResponse::Provisioned(
                    core.provision(&instance_id, &details, accepts_incomplete)
                        .await?,
                ),
                Operation::Update {
                    instance_id,
                    details,
                    accepts_incomplete,
                    ..
                } => OperationResponse::Updated(
                    core.update(&instance_id, &details, accepts_incomplete)
                        .await?,
                ),
                Operation::Deprovision {
                    instance_id,
                    details,
                    accepts_incomplete,
                    ..
                } => OperationResponse::Deprovisioned(
                    core.deprovision(&instance_id, &details, accepts_incomplete)
                        .await?,
                ),
                Operation::Bind {
                    instance_id,
                    binding_id,
                    details,
                    ..
                } => OperationResponse::Bound(
                    core.bind(&instance_id, &binding_id, &details).await?,
                ),
                Operation::Unbind {
                    instance_id,
                    binding_id,
                    details,
                    ..
                } => {
                    core.unbind(&instance_id, &binding_id, &details).await?;
                    OperationResponse::Unbound
                }
                Operation::LastOperation {
                    instance_id,
                    operation,
                    ..
                } => OperationResponse::LastOperation(
                    core.last_operation(&instance_id, operation.as_deref())
                        .await?,
                ),
            };
            Ok(response)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use osbroker_core::{
        BrokerError, Catalog, ProvisionDetails, Service as CatalogService, ServicePlan,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::driver::InMemoryDriver;
    use crate::service::config::BrokerConfig;
    use crate::service::operation::{verbs, OperationContext};

    fn service() -> BrokerService {
        let catalog = Catalog::new(vec![CatalogService {
            id: "db".to_string(),
            name: "database".to_string(),
            description: "On-demand database".to_string(),
            bindable: true,
            plan_updateable: false,
            plans: vec![ServicePlan {
                id: "small".to_string(),
                name: "small".to_string(),
                description: "Small".to_string(),
                free: None,
                bindable: None,
                metadata: None,
            }],
            metadata: None,
            tags: Vec::new(),
            requires: Vec::new(),
        }]);
        let core = BrokerCore::new(
            Arc::new(BrokerConfig::default()),
            Arc::new(catalog),
            Arc::new(InMemoryDriver::default()),
        );
        BrokerService::new(Arc::new(core))
    }

    fn provision(instance_id: &str) -> Operation {
        Operation::Provision {
            ctx: OperationContext::new(1, verbs::PROVISION),
            instance_id: instance_id.to_string(),
            details: ProvisionDetails {
                service_id: "db".to_string(),
                plan_id: "small".to_string(),
                ..ProvisionDetails::default()
            },
            accepts_incomplete: false,
        }
    }

    #[tokio::test]
    async fn catalog_is_served() {
        let resp = service()
            .oneshot(Operation::Catalog {
                ctx: OperationContext::new(1, verbs::CATALOG),
            })
            .await
            .unwrap();
        let OperationResponse::Catalog(catalog) = resp else {
            panic!("expected catalog response");
        };
        assert_eq!(catalog.services.len(), 1);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let svc = service();
        svc.clone().oneshot(provision("a")).await.unwrap();

        let resp = svc.clone().oneshot(provision("a")).await.unwrap();
        assert!(matches!(
            resp,
            OperationResponse::Provisioned(ref p) if p.already_exists
        ));
        assert_eq!(svc.core().instances().len(), 1);
    }

    #[tokio::test]
    async fn broker_errors_are_wrapped() {
        let err = service()
            .oneshot(Operation::LastOperation {
                ctx: OperationContext::new(1, verbs::LAST_OPERATION),
                instance_id: "a".to_string(),
                operation: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OperationError::Broker(BrokerError::OperationNotFound { .. })
        ));
    }
}
