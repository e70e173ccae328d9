//! Broker operation pipeline.
//!
//! 1. **Classification** (`classify`): `BrokerRequest` -> `Result<Operation, ClassifyError>`
//! 2. **Middleware** (`middleware`): Tower layers (metrics, load-shedding)
//! 3. **Domain service** (`domain`): `tower::Service<Operation>` over the broker core
//! 4. **Broker core** (`broker`): the lifecycle state machine
//! 5. **Background sweeping** (`worker`): drops finished operations after retention

pub mod broker;
pub mod classify;
pub mod config;
pub mod domain;
pub mod middleware;
pub mod operation;
pub mod worker;

pub use broker::{BrokerCore, BrokerStats};
pub use classify::OperationService;
pub use config::{BindingCascade, BrokerConfig, DuplicatePolicy};
pub use domain::BrokerService;
pub use middleware::{build_operation_pipeline, OperationPipeline};
pub use operation::{
    verbs, BrokerRequest, ClassifyError, Operation, OperationContext, OperationError,
    OperationResponse,
};
pub use worker::{OperationSweeper, SweeperHandle};
