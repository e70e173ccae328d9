//! HTTP middleware for the broker transport.
//!
//! [`build_http_layers`] is the Tower stack applied to every request.
//! Middleware ordering follows the outer-to-inner convention: the first
//! layer listed is the outermost (processes the request first on the way
//! in, and the response last on the way out).
//!
//! [`admit_broker_request`] and [`check_api_version`] run only on the `/v2`
//! routes; health endpoints bypass them.

use axum::extract::{Request, State};
use axum::http::header::HeaderName;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;
use super::error::ApiError;
use super::handlers::AppState;

/// Header carrying the caller's Open Service Broker API version.
pub const API_VERSION_HEADER: &str = "x-broker-api-version";

/// The composed Tower layer type produced by [`build_http_layers`].
type HttpLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        RequestBodyLimitLayer,
        tower::layer::util::Stack<
            TraceLayer<
                tower_http::classify::SharedClassifier<
                    tower_http::classify::ServerErrorsAsFailures,
                >,
            >,
            tower::layer::util::Stack<
                SetRequestIdLayer<MakeRequestUuid>,
                tower::layer::util::Identity,
            >,
        >,
    >,
>;

/// Builds the HTTP-level Tower middleware stack from the network configuration.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `SetRequestId` -- assigns a UUID v4 `X-Request-Id` to every incoming request
/// 2. `Tracing` -- logs request/response with structured trace spans
/// 3. `RequestBodyLimit` -- rejects oversized bodies with 413
/// 4. `PropagateRequestId` -- copies `X-Request-Id` from the request to the response
///
/// There is no request timeout: a broker call that has reached the driver
/// must finish so the registries match the backing service.
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let x_request_id = HeaderName::from_static("x-request-id");

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(
            x_request_id.clone(),
            MakeRequestUuid,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

/// Rejects broker requests unless the server is `Ready`, and counts admitted
/// requests as in flight until their response is produced.
pub async fn admit_broker_request(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.shutdown.is_accepting() {
        return ApiError::Draining.into_response();
    }
    let _guard = state.shutdown.in_flight_guard();
    next.run(request).await
}

/// Enforces a 2.x `X-Broker-API-Version` when the server requires one.
pub async fn check_api_version(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.config.require_api_version {
        let version = request
            .headers()
            .get(API_VERSION_HEADER)
            .and_then(|v| v.to_str().ok());
        if !version.is_some_and(is_supported_version) {
            let shown = version.unwrap_or("<missing>").to_string();
            return ApiError::ApiVersion(shown).into_response();
        }
    }
    next.run(request).await
}

fn is_supported_version(version: &str) -> bool {
    version
        .trim()
        .split('.')
        .next()
        .is_some_and(|major| major == "2")
}
