//! Translation of broker failures into HTTP responses.
//!
//! Every error body has the shape `{"error": <kind>, "description": <message>}`.
//! Two kinds use the names orchestrators match on literally:
//! `AsyncRequired` and `ConcurrencyError`.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use osbroker_core::{BrokerError, ErrorKind};
use serde_json::json;
use tracing::error;

use crate::service::operation::verbs;
use crate::service::{ClassifyError, OperationError};

/// A failed broker request, ready to be rendered.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request decoded but failed validation.
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    /// The JSON body could not be decoded.
    #[error("malformed request body: {0}")]
    Body(#[from] JsonRejection),

    /// The query string could not be decoded.
    #[error("malformed query string: {0}")]
    Query(#[from] QueryRejection),

    /// The caller's `X-Broker-API-Version` is missing or unsupported.
    #[error("unsupported broker API version: {0}")]
    ApiVersion(String),

    /// The server is draining and admits no new broker requests.
    #[error("the broker is shutting down")]
    Draining,

    /// The operation ran and failed. `verb` selects verb-specific statuses.
    #[error("{source}")]
    Operation {
        verb: &'static str,
        #[source]
        source: OperationError,
    },
}

impl ApiError {
    #[must_use]
    pub fn operation(verb: &'static str, source: OperationError) -> Self {
        Self::Operation { verb, source }
    }

    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Classify(_) | Self::Body(_) | Self::Query(_) => StatusCode::BAD_REQUEST,
            Self::ApiVersion(_) => StatusCode::PRECONDITION_FAILED,
            Self::Draining => StatusCode::SERVICE_UNAVAILABLE,
            Self::Operation { verb, source } => match source {
                OperationError::Broker(err) => broker_status(verb, err),
                OperationError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
                OperationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Value of the `error` field in the response body.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Classify(_) | Self::Body(_) | Self::Query(_) => "malformed_request",
            Self::ApiVersion(_) => "precondition_failed",
            Self::Draining => "unavailable",
            Self::Operation { source, .. } => match source {
                OperationError::Broker(err) => match err.kind() {
                    ErrorKind::AsyncRequired => "AsyncRequired",
                    ErrorKind::OperationInProgress => "ConcurrencyError",
                    kind => kind.as_str(),
                },
                OperationError::Overloaded => "overloaded",
                OperationError::Internal(_) => "internal",
            },
        }
    }
}

fn broker_status(verb: &str, err: &BrokerError) -> StatusCode {
    match err.kind() {
        ErrorKind::InstanceAlreadyExists | ErrorKind::BindingAlreadyExists => StatusCode::CONFLICT,
        ErrorKind::InstanceDoesNotExist if verb == verbs::DEPROVISION => StatusCode::GONE,
        ErrorKind::InstanceDoesNotExist => StatusCode::NOT_FOUND,
        ErrorKind::BindingDoesNotExist | ErrorKind::OperationNotFound => StatusCode::GONE,
        ErrorKind::AsyncRequired
        | ErrorKind::OperationInProgress
        | ErrorKind::PlanChangeNotSupported
        | ErrorKind::InstanceHasBindings
        | ErrorKind::InstanceFailed => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::UnknownPlan => StatusCode::BAD_REQUEST,
        ErrorKind::InstanceLimitReached | ErrorKind::Driver => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!(error = %self, code = self.error_code(), "broker request failed");
        }
        let body = json!({
            "error": self.error_code(),
            "description": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
