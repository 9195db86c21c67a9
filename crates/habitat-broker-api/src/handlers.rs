//! OSB route handlers.
//!
//! Each handler decodes the wire request into a typed operation, runs it on
//! the [`LifecycleManager`](habitat_broker_lifecycle::LifecycleManager) and
//! encodes the result. Every outcome is counted in [`BrokerMetrics`](crate::BrokerMetrics).
//!
//! Mutating operations run on their own task. A request dropped mid-flight
//! cancels that task's token instead of abandoning it, so the operation
//! still unwinds and deletes whatever it created.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use habitat_broker_core::osb::{
    BindRequest, DeprovisionRequest, ProvisionRequest, UnbindRequest, UpdateRequest,
};
use habitat_broker_lifecycle::BrokerResult;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::ApiState;
use crate::error::ApiError;
use crate::metrics::Operation;

// ── Wire types ─────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ProvisionBody {
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub plan_id: String,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateBody {
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BindBody {
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub plan_id: String,
}

/// Query string shared by all instance and binding routes.
#[derive(Debug, Default, Deserialize)]
pub struct OperationQuery {
    #[serde(default)]
    pub accepts_incomplete: bool,
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub plan_id: String,
}

fn query(q: Result<Query<OperationQuery>, QueryRejection>) -> Result<OperationQuery, ApiError> {
    q.map(|Query(q)| q)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

fn body<T>(b: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    b.map(|Json(b)| b)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

fn accepted_or(is_async: bool, status: StatusCode) -> StatusCode {
    if is_async { StatusCode::ACCEPTED } else { status }
}

/// Count the outcome and turn it into a response.
fn finish(state: &ApiState, op: Operation, result: Result<Response, ApiError>) -> Response {
    state.metrics.record(op, result.is_ok());
    match result {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

/// A token cancelled on shutdown or when the returned guard is dropped.
fn request_token(state: &ApiState) -> (CancellationToken, tokio_util::sync::DropGuard) {
    let token = state.shutdown.child_token();
    let guard = token.clone().drop_guard();
    (token, guard)
}

/// Run a lifecycle operation to completion on its own task.
async fn detached<T, F>(op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: Future<Output = BrokerResult<T>> + Send + 'static,
{
    match tokio::spawn(op).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "InternalError",
            format!("operation task failed: {e}"),
        )),
    }
}

// ── Catalog ────────────────────────────────────────────────────

/// GET /v2/catalog
pub async fn get_catalog(State(state): State<ApiState>) -> Response {
    let catalog = state.manager.catalog();
    finish(&state, Operation::Catalog, Ok(Json(catalog).into_response()))
}

// ── Instances ──────────────────────────────────────────────────

/// PUT /v2/service_instances/{instance_id}
pub async fn provision(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
    q: Result<Query<OperationQuery>, QueryRejection>,
    b: Result<Json<ProvisionBody>, JsonRejection>,
) -> Response {
    let (cancel, _guard) = request_token(&state);
    let result = async {
        let q = query(q)?;
        let b = body(b)?;
        let req = ProvisionRequest {
            instance_id,
            service_id: b.service_id,
            plan_id: b.plan_id,
            accepts_incomplete: q.accepts_incomplete,
            parameters: b.parameters,
            context: b.context,
        };
        let manager = state.manager.clone();
        let resp = detached(async move { manager.provision(&req, &cancel).await }).await?;
        Ok::<_, ApiError>((accepted_or(resp.is_async, StatusCode::CREATED), Json(resp)).into_response())
    }
    .await;
    finish(&state, Operation::Provision, result)
}

/// PATCH /v2/service_instances/{instance_id}
pub async fn update(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
    q: Result<Query<OperationQuery>, QueryRejection>,
    b: Result<Json<UpdateBody>, JsonRejection>,
) -> Response {
    let result = async {
        let q = query(q)?;
        let b = body(b)?;
        let req = UpdateRequest {
            instance_id,
            service_id: b.service_id,
            plan_id: b.plan_id,
            accepts_incomplete: q.accepts_incomplete,
            parameters: b.parameters,
        };
        let resp = state.manager.update(&req).await?;
        Ok::<_, ApiError>((accepted_or(resp.is_async, StatusCode::OK), Json(resp)).into_response())
    }
    .await;
    finish(&state, Operation::Update, result)
}

/// DELETE /v2/service_instances/{instance_id}
pub async fn deprovision(
    State(state): State<ApiState>,
    Path(instance_id): Path<String>,
    q: Result<Query<OperationQuery>, QueryRejection>,
) -> Response {
    let (cancel, _guard) = request_token(&state);
    let result = async {
        let q = query(q)?;
        let req = DeprovisionRequest {
            instance_id,
            service_id: q.service_id,
            plan_id: q.plan_id,
            accepts_incomplete: q.accepts_incomplete,
        };
        let manager = state.manager.clone();
        let resp = detached(async move { manager.deprovision(&req, &cancel).await }).await?;
        Ok::<_, ApiError>((accepted_or(resp.is_async, StatusCode::OK), Json(resp)).into_response())
    }
    .await;
    finish(&state, Operation::Deprovision, result)
}

/// GET /v2/service_instances/{instance_id}/last_operation
pub async fn last_operation(State(state): State<ApiState>, Path(instance_id): Path<String>) -> Response {
    let result = state
        .manager
        .last_operation(&instance_id)
        .await
        .map(|()| StatusCode::OK.into_response())
        .map_err(ApiError::from);
    finish(&state, Operation::LastOperation, result)
}

// ── Bindings ───────────────────────────────────────────────────

/// PUT /v2/service_instances/{instance_id}/service_bindings/{binding_id}
pub async fn bind(
    State(state): State<ApiState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    q: Result<Query<OperationQuery>, QueryRejection>,
    b: Result<Json<BindBody>, JsonRejection>,
) -> Response {
    let (cancel, _guard) = request_token(&state);
    let result = async {
        let q = query(q)?;
        let b = body(b)?;
        let req = BindRequest {
            instance_id,
            binding_id,
            service_id: b.service_id,
            plan_id: b.plan_id,
            accepts_incomplete: q.accepts_incomplete,
        };
        let manager = state.manager.clone();
        let resp = detached(async move { manager.bind(&req, &cancel).await }).await?;
        let status = if resp.exists { StatusCode::OK } else { StatusCode::CREATED };
        Ok::<_, ApiError>((accepted_or(resp.is_async, status), Json(resp)).into_response())
    }
    .await;
    finish(&state, Operation::Bind, result)
}

/// DELETE /v2/service_instances/{instance_id}/service_bindings/{binding_id}
pub async fn unbind(
    State(state): State<ApiState>,
    Path((instance_id, binding_id)): Path<(String, String)>,
    q: Result<Query<OperationQuery>, QueryRejection>,
) -> Response {
    let (cancel, _guard) = request_token(&state);
    let result = async {
        let q = query(q)?;
        let req = UnbindRequest {
            instance_id,
            binding_id,
            service_id: q.service_id,
            plan_id: q.plan_id,
            accepts_incomplete: q.accepts_incomplete,
        };
        let manager = state.manager.clone();
        let resp = detached(async move { manager.unbind(&req, &cancel).await }).await?;
        Ok::<_, ApiError>((accepted_or(resp.is_async, StatusCode::OK), Json(resp)).into_response())
    }
    .await;
    finish(&state, Operation::Unbind, result)
}

// ── Operational ────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let registered = state.manager.registry().snapshot().await.len();
    let body = state.metrics.render_prometheus(registered);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
