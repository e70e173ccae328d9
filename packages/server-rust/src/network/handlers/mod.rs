//! HTTP handler definitions for the broker server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod broker;
pub mod health;

pub use broker::{
    bind_handler, catalog_handler, deprovision_handler, last_operation_handler,
    provision_handler, unbind_handler, update_handler,
};
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use super::{NetworkConfig, ShutdownController};
use crate::service::{BrokerCore, OperationPipeline, OperationService};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Middleware-wrapped broker service. Cloned per request.
    pub pipeline: OperationPipeline,
    /// Turns decoded requests into typed operations.
    pub classifier: Arc<OperationService>,
    /// Broker core, read directly for health statistics.
    pub core: Arc<BrokerCore>,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Builds the state for a broker core, wrapping it in the operation pipeline.
    #[must_use]
    pub fn new(
        core: Arc<BrokerCore>,
        shutdown: Arc<ShutdownController>,
        config: Arc<NetworkConfig>,
    ) -> Self {
        let pipeline = crate::service::build_operation_pipeline(
            crate::service::BrokerService::new(Arc::clone(&core)),
            core.config(),
        );
        Self {
            pipeline,
            classifier: Arc::new(OperationService::new()),
            core,
            shutdown,
            config,
            start_time: Instant::now(),
        }
    }
}
