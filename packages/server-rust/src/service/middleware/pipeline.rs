//! Pipeline composition: combines all middleware layers into a single service stack.

use tower::ServiceBuilder;

use super::load_shed::{LoadShedLayer, LoadShedService};
use super::metrics::{MetricsLayer, MetricsService};
use crate::service::config::BrokerConfig;
use crate::service::domain::BrokerService;

/// The assembled operation pipeline. Clone per request.
pub type OperationPipeline = LoadShedService<MetricsService<BrokerService>>;

/// Build the operation pipeline by wrapping the `BrokerService` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- shed mutations past the limit before any work is done
/// 2. `MetricsLayer` -- record timing and outcome (closest to the actual handler)
///
/// There is no timeout layer: once the driver has been called, abandoning
/// the request would leave registry state out of step with the backing service.
#[must_use]
pub fn build_operation_pipeline(service: BrokerService, config: &BrokerConfig) -> OperationPipeline {
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_operations))
        .layer(MetricsLayer)
        .service(service)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
