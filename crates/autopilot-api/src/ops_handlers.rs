//! REST API handlers for chaos experiments and infrastructure.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::info;

use autopilot_chaos::ChaosError;
use autopilot_core::{ChaosExperiment, ChaosResult, DesiredState};

use crate::ApiState;
use crate::handlers::{ApiResponse, error_response};

fn chaos_error(e: &ChaosError) -> Response {
    let status = match e {
        ChaosError::UnknownExperiment(_) => StatusCode::NOT_FOUND,
        ChaosError::AlreadyRunning { .. } | ChaosError::NotRunning(_) => StatusCode::CONFLICT,
        ChaosError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

#[derive(Serialize)]
struct RunningExperiment {
    experiment: String,
    run_id: String,
}

#[derive(Serialize)]
struct ChaosOverview<'a> {
    experiments: Vec<&'a ChaosExperiment>,
    running: Vec<RunningExperiment>,
    results: Vec<ChaosResult>,
}

// ── Chaos ──────────────────────────────────────────────────────

/// GET /api/v1/chaos
pub async fn list_chaos(State(state): State<ApiState>) -> Response {
    let results = match state.chaos.results() {
        Ok(results) => results,
        Err(e) => return chaos_error(&e),
    };
    let running = state
        .chaos
        .running()
        .await
        .into_iter()
        .map(|(experiment, run_id)| RunningExperiment { experiment, run_id })
        .collect();
    ApiResponse::ok(ChaosOverview {
        experiments: state.chaos.experiments().collect(),
        running,
        results,
    })
    .into_response()
}

/// POST /api/v1/chaos/{name}/run
pub async fn run_chaos(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.chaos.start(&name).await {
        Ok(run_id) => (
            StatusCode::ACCEPTED,
            ApiResponse::ok(serde_json::json!({ "experiment": name, "run_id": run_id })),
        )
            .into_response(),
        Err(e) => chaos_error(&e),
    }
}

/// POST /api/v1/chaos/{name}/stop
pub async fn stop_chaos(State(state): State<ApiState>, Path(name): Path<String>) -> Response {
    match state.chaos.stop(&name).await {
        Ok(()) => ApiResponse::ok(serde_json::json!({ "experiment": name, "status": "stopping" }))
            .into_response(),
        Err(e) => chaos_error(&e),
    }
}

// ── Infrastructure ─────────────────────────────────────────────

/// Desired state from the request body, or the configured one when the
/// body is empty.
fn desired_state(state: &ApiState, body: &Bytes) -> Result<DesiredState, Response> {
    if !body.is_empty() {
        return serde_json::from_slice(body).map_err(|e| {
            error_response(&format!("invalid desired state: {e}"), StatusCode::BAD_REQUEST)
        });
    }
    state.desired.as_deref().cloned().ok_or_else(|| {
        error_response(
            "no desired infrastructure state configured",
            StatusCode::BAD_REQUEST,
        )
    })
}

/// POST /api/v1/infrastructure/plan
pub async fn plan_infrastructure(State(state): State<ApiState>, body: Bytes) -> Response {
    let desired = match desired_state(&state, &body) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    match state.reconciler.plan(&desired).await {
        Ok(changes) => ApiResponse::ok(changes).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::BAD_GATEWAY),
    }
}

/// POST /api/v1/infrastructure/apply
pub async fn apply_infrastructure(State(state): State<ApiState>, body: Bytes) -> Response {
    let desired = match desired_state(&state, &body) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    match state.reconciler.reconcile(&desired).await {
        Ok(report) => {
            info!(
                total = report.summary.total,
                failed = report.summary.failed,
                aborted = report.aborted,
                "infrastructure applied via api"
            );
            ApiResponse::ok(report).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::BAD_GATEWAY),
    }
}
