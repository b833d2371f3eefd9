//! REST API handlers for deployments, scaling, health and metrics.
//!
//! Every handler answers with the `{success, data?, error?}` envelope.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use autopilot_core::{ArtifactConfig, DeploymentStrategy, ServiceMetrics};
use autopilot_rollout::RolloutError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn unknown_service(service: &str) -> Response {
    error_response(&format!("unknown service: {service}"), StatusCode::NOT_FOUND)
}

fn rollout_error(e: &RolloutError) -> Response {
    let status = match e {
        RolloutError::UnsupportedStrategy(_) => StatusCode::BAD_REQUEST,
        RolloutError::NotFound(_) => StatusCode::NOT_FOUND,
        RolloutError::AlreadyInProgress { .. } | RolloutError::AlreadyFinished(_) => {
            StatusCode::CONFLICT
        }
        RolloutError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok(serde_json::json!({ "status": "ok" }))
}

// ── Deployments ────────────────────────────────────────────────

/// GET /api/v1/deployments
pub async fn list_deployments(State(state): State<ApiState>) -> Response {
    match state.orchestrator.list().await {
        Ok(deployments) => ApiResponse::ok(deployments).into_response(),
        Err(e) => rollout_error(&e),
    }
}

/// GET /api/v1/deployments/{id}
pub async fn get_deployment(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.get(&id).await {
        Ok(deployment) => ApiResponse::ok(deployment).into_response(),
        Err(e) => rollout_error(&e),
    }
}

/// Body of a deployment request.
#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    pub version: String,
    /// Overrides the configured strategy.
    #[serde(default)]
    pub strategy: Option<DeploymentStrategy>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// POST /api/v1/services/{service}/deployments
///
/// Registers the deployment and drives it in the background.
pub async fn start_deployment(
    State(state): State<ApiState>,
    Path(service): Path<String>,
    Json(req): Json<DeployRequest>,
) -> Response {
    if !state.services.contains(&service) {
        return unknown_service(&service);
    }
    let config = ArtifactConfig {
        version: req.version,
        params: req.params,
    };
    match state.orchestrator.spawn(&service, config, req.strategy).await {
        Ok(deployment) => (StatusCode::CREATED, ApiResponse::ok(deployment)).into_response(),
        Err(e) => rollout_error(&e),
    }
}

/// POST /api/v1/deployments/{id}/stop
pub async fn stop_deployment(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.stop(&id).await {
        Ok(()) => ApiResponse::ok(serde_json::json!({ "id": id, "status": "stopping" }))
            .into_response(),
        Err(e) => rollout_error(&e),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /api/v1/services/{service}/verdict
///
/// The monitor's latest verdict, probing on demand if there is none yet.
pub async fn get_verdict(State(state): State<ApiState>, Path(service): Path<String>) -> Response {
    if !state.services.contains(&service) {
        return unknown_service(&service);
    }
    let verdict = match state.monitor.latest(&service).await {
        Some(v) => v,
        None => state.monitor.refresh(&service).await,
    };
    ApiResponse::ok(verdict).into_response()
}

// ── Metrics ────────────────────────────────────────────────────

/// POST /api/v1/services/{service}/metrics
pub async fn push_metrics(
    State(state): State<ApiState>,
    Path(service): Path<String>,
    Json(metrics): Json<ServiceMetrics>,
) -> Response {
    if !state.services.contains(&service) {
        return unknown_service(&service);
    }
    let Some(pushed) = &state.pushed else {
        return error_response(
            "metrics are collected by the platform, not pushed",
            StatusCode::CONFLICT,
        );
    };
    pushed.record(&service, metrics).await;
    (
        StatusCode::ACCEPTED,
        ApiResponse::ok(serde_json::json!({ "service": service })),
    )
        .into_response()
}

// ── Scaling ────────────────────────────────────────────────────

/// GET /api/v1/scaling
pub async fn list_scaling(State(state): State<ApiState>) -> Response {
    match state.store.list_scaling_states() {
        Ok(states) => ApiResponse::ok(states).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /api/v1/services/{service}/scaling
pub async fn scaling_history(
    State(state): State<ApiState>,
    Path(service): Path<String>,
) -> Response {
    if !state.services.contains(&service) {
        return unknown_service(&service);
    }
    match state.store.list_scaling_events(&service, 50) {
        Ok(events) => ApiResponse::ok(events).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}
