//! Open Service Broker v2 route handlers.
//!
//! Each handler decodes path, query, and body into a [`BrokerRequest`],
//! classifies it, runs it through the operation pipeline, and picks the
//! status code from the response.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use osbroker_core::{
    BindDetails, BindResponse, Catalog, DeprovisionDetails, DeprovisionResponse, LastOperation,
    ProvisionDetails, ProvisionResponse, UnbindDetails, UpdateDetails, UpdateResponse,
};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceExt;

use super::AppState;
use crate::network::error::ApiError;
use crate::service::operation::verbs;
use crate::service::{BrokerRequest, OperationError, OperationResponse};

/// Query parameters accepted by the broker routes. Each route reads the
/// subset it needs.
#[derive(Debug, Default, Deserialize)]
pub struct BrokerQuery {
    #[serde(default)]
    pub accepts_incomplete: bool,
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub plan_id: String,
    #[serde(default)]
    pub operation: Option<String>,
}

fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Classifies `request` and runs it through the pipeline.
async fn dispatch(
    state: &AppState,
    headers: &HeaderMap,
    request: BrokerRequest,
) -> Result<OperationResponse, ApiError> {
    let op = state.classifier.classify(request, request_id(headers))?;
    let verb = op.ctx().verb;
    state
        .pipeline
        .clone()
        .oneshot(op)
        .await
        .map_err(|err| ApiError::operation(verb, err))
}

fn unexpected(verb: &'static str, response: &OperationResponse) -> ApiError {
    ApiError::operation(
        verb,
        OperationError::Internal(anyhow::anyhow!("unexpected response {response:?}")),
    )
}

fn accepted_or(is_async: bool, status: StatusCode) -> StatusCode {
    if is_async {
        StatusCode::ACCEPTED
    } else {
        status
    }
}

/// `GET /v2/catalog`
pub async fn catalog_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Catalog>, ApiError> {
    match dispatch(&state, &headers, BrokerRequest::Catalog).await? {
        OperationResponse::Catalog(catalog) => Ok(Json(Catalog::clone(&catalog))),
        other => Err(unexpected(verbs::CATALOG, &other)),
    }
}

/// `PUT /v2/service_instances/{instance_id}`
///
/// 201 for a new instance, 200 for an identical replay, 202 when the work
/// continues asynchronously.
pub async fn provision_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    query: Result<Query<BrokerQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Result<Json<ProvisionDetails>, JsonRejection>,
) -> Result<(StatusCode, Json<ProvisionResponse>), ApiError> {
    let Query(query) = query?;
    let Json(details) = body?;
    let request = BrokerRequest::Provision {
        instance_id,
        details,
        accepts_incomplete: query.accepts_incomplete,
    };
    match dispatch(&state, &headers, request).await? {
        OperationResponse::Provisioned(resp) => {
            let fresh = if resp.already_exists {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            Ok((accepted_or(resp.is_async, fresh), Json(resp)))
        }
        other => Err(unexpected(verbs::PROVISION, &other)),
    }
}

/// `PATCH /v2/service_instances/{instance_id}`
pub async fn update_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    query: Result<Query<BrokerQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Result<Json<UpdateDetails>, JsonRejection>,
) -> Result<(StatusCode, Json<UpdateResponse>), ApiError> {
    let Query(query) = query?;
    let Json(details) = body?;
    let request = BrokerRequest::Update {
        instance_id,
        details,
        accepts_incomplete: query.accepts_incomplete,
    };
    match dispatch(&state, &headers, request).await? {
        OperationResponse::Updated(resp) => {
            Ok((accepted_or(resp.is_async, StatusCode::OK), Json(resp)))
        }
        other => Err(unexpected(verbs::UPDATE, &other)),
    }
}

/// `DELETE /v2/service_instances/{instance_id}`
pub async fn deprovision_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    query: Result<Query<BrokerQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<DeprovisionResponse>), ApiError> {
    let Query(query) = query?;
    let request = BrokerRequest::Deprovision {
        instance_id,
        details: DeprovisionDetails {
            service_id: query.service_id,
            plan_id: query.plan_id,
        },
        accepts_incomplete: query.accepts_incomplete,
    };
    match dispatch(&state, &headers, request).await? {
        OperationResponse::Deprovisioned(resp) => {
            Ok((accepted_or(resp.is_async, StatusCode::OK), Json(resp)))
        }
        other => Err(unexpected(verbs::DEPROVISION, &other)),
    }
}

/// `PUT /v2/service_instances/{instance_id}/service_bindings/{binding_id}`
pub async fn bind_handler(
    State(state): State<AppState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Result<Json<BindDetails>, JsonRejection>,
) -> Result<(StatusCode, Json<BindResponse>), ApiError> {
    let Json(details) = body?;
    let request = BrokerRequest::Bind {
        instance_id,
        binding_id,
        details,
    };
    match dispatch(&state, &headers, request).await? {
        OperationResponse::Bound(resp) => {
            let status = if resp.already_exists {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            Ok((status, Json(resp)))
        }
        other => Err(unexpected(verbs::BIND, &other)),
    }
}

/// `DELETE /v2/service_instances/{instance_id}/service_bindings/{binding_id}`
pub async fn unbind_handler(
    State(state): State<AppState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    query: Result<Query<BrokerQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Query(query) = query?;
    let request = BrokerRequest::Unbind {
        instance_id,
        binding_id,
        details: UnbindDetails {
            service_id: query.service_id,
            plan_id: query.plan_id,
        },
    };
    match dispatch(&state, &headers, request).await? {
        OperationResponse::Unbound => Ok(Json(json!({}))),
        other => Err(unexpected(verbs::UNBIND, &other)),
    }
}

/// `GET /v2/service_instances/{instance_id}/last_operation`
pub async fn last_operation_handler(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    query: Result<Query<BrokerQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Json<LastOperation>, ApiError> {
    let Query(query) = query?;
    let request = BrokerRequest::LastOperation {
        instance_id,
        operation: query.operation,
    };
    match dispatch(&state, &headers, request).await? {
        OperationResponse::LastOperation(last) => Ok(Json(last)),
        other => Err(unexpected(verbs::LAST_OPERATION, &other)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
