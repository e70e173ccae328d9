//! HTTP transport: configuration, Open Service Broker routes, error mapping,
//! and shutdown control.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::NetworkConfig;
pub use error::ApiError;
pub use handlers::AppState;
pub use module::{build_router, BrokerServer};
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
