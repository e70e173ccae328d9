//! Broker HTTP server with deferred startup lifecycle.
//!
//! `new()` creates resources, `start()` binds the TCP listener, and `serve()`
//! starts accepting connections. Between `start()` and `serve()` the caller
//! can hand the shutdown controller to other tasks (e.g. the sweeper).

use std::future::Future;
use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, put};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    bind_handler, catalog_handler, deprovision_handler, health_handler, last_operation_handler,
    liveness_handler, provision_handler, readiness_handler, unbind_handler, update_handler,
    AppState,
};
use super::middleware::{admit_broker_request, build_http_layers, check_api_version};
use super::shutdown::ShutdownController;
use crate::service::BrokerCore;

/// Assembles the axum router with all routes and middleware.
///
/// Routes:
/// - `GET /v2/catalog`
/// - `PUT|PATCH|DELETE /v2/service_instances/{instance_id}`
/// - `GET /v2/service_instances/{instance_id}/last_operation`
/// - `PUT|DELETE /v2/service_instances/{instance_id}/service_bindings/{binding_id}`
/// - `GET /health`, `/health/live`, `/health/ready`
pub fn build_router(state: AppState) -> Router {
    let layers = build_http_layers(&state.config);

    let broker_api = Router::new()
        .route("/v2/catalog", get(catalog_handler))
        .route(
            "/v2/service_instances/{instance_id}",
            put(provision_handler)
                .patch(update_handler)
                .delete(deprovision_handler),
        )
        .route(
            "/v2/service_instances/{instance_id}/last_operation",
            get(last_operation_handler),
        )
        .route(
            "/v2/service_instances/{instance_id}/service_bindings/{binding_id}",
            put(bind_handler).delete(unbind_handler),
        )
        .route_layer(from_fn_with_state(state.clone(), check_api_version))
        .route_layer(from_fn_with_state(state.clone(), admit_broker_request));

    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .merge(broker_api)
        .layer(layers)
        .with_state(state)
}

/// Manages the broker's HTTP server lifecycle.
///
/// 1. `new()` -- allocates shared state (shutdown controller)
/// 2. `start()` -- binds TCP listener to the configured address
/// 3. `serve()` -- accepts connections until shutdown is signalled
pub struct BrokerServer {
    config: NetworkConfig,
    core: Arc<BrokerCore>,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl BrokerServer {
    #[must_use]
    pub fn new(config: NetworkConfig, core: Arc<BrokerCore>) -> Self {
        Self {
            config,
            core,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    /// Returns a shared reference to the shutdown controller.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    fn state(&self) -> AppState {
        AppState::new(
            Arc::clone(&self.core),
            Arc::clone(&self.shutdown),
            Arc::new(self.config.clone()),
        )
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which differs from the configured
    /// port when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "TCP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves broker requests until `shutdown` resolves, then drains.
    ///
    /// After the shutdown signal the health state moves to `Draining`, new
    /// broker requests get 503, and in-flight ones are given up to the
    /// configured drain timeout to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called first or the server
    /// hits a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener.take() else {
            anyhow::bail!("start() must be called before serve()");
        };
        let router = build_router(self.state());
        let controller = Arc::clone(&self.shutdown);
        let signal_controller = Arc::clone(&self.shutdown);

        controller.set_ready();
        info!("serving broker API");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("shutdown signal received, draining");
                signal_controller.trigger_shutdown();
            })
            .await?;

        if controller.wait_for_drain(self.config.drain_timeout).await {
            info!("all in-flight requests completed");
        } else {
            warn!(
                in_flight = controller.in_flight_count(),
                "drain timeout expired with requests still in flight"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use osbroker_core::Catalog;

    use super::*;
    use crate::driver::InMemoryDriver;
    use crate::network::HealthState;
    use crate::service::BrokerConfig;

    fn core() -> Arc<BrokerCore> {
        Arc::new(BrokerCore::new(
            Arc::new(BrokerConfig::default()),
            Arc::new(Catalog::default()),
            Arc::new(InMemoryDriver::default()),
        ))
    }

    fn local_config() -> NetworkConfig {
        NetworkConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            drain_timeout: Duration::from_secs(1),
            ..NetworkConfig::default()
        }
    }

    #[tokio::test]
    async fn start_binds_an_ephemeral_port() {
        let mut server = BrokerServer::new(local_config(), core());
        let port = server.start().await.unwrap();
        assert_ne!(port, 0);
    }

    #[tokio::test]
    async fn serve_without_start_is_an_error() {
        let server = BrokerServer::new(local_config(), core());
        let err = server.serve(async {}).await.unwrap_err();
        assert!(err.to_string().contains("start()"));
    }

    #[tokio::test]
    async fn serve_stops_on_signal_and_reports_stopped() {
        let mut server = BrokerServer::new(local_config(), core());
        server.start().await.unwrap();
        let controller = server.shutdown_controller();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(async move {
            let _ = rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(controller.health_state(), HealthState::Ready);

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(controller.health_state(), HealthState::Stopped);
    }
}
