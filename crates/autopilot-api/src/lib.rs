//! autopilot-api — operator REST API.
//!
//! Lets operators and CI trigger deployments and chaos runs, stop them,
//! read scaling state and health verdicts, push metrics, and plan or
//! apply infrastructure changes.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness |
//! | GET | `/api/v1/deployments` | List deployments |
//! | GET | `/api/v1/deployments/{id}` | Get one deployment |
//! | POST | `/api/v1/deployments/{id}/stop` | Stop a running deployment |
//! | POST | `/api/v1/services/{service}/deployments` | Start a deployment |
//! | GET | `/api/v1/services/{service}/verdict` | Latest health verdict |
//! | POST | `/api/v1/services/{service}/metrics` | Push a metrics snapshot |
//! | GET | `/api/v1/services/{service}/scaling` | Scaling history |
//! | GET | `/api/v1/scaling` | Scaling state per service |
//! | GET | `/api/v1/chaos` | Experiments, runs in flight, results |
//! | POST | `/api/v1/chaos/{name}/run` | Start an experiment |
//! | POST | `/api/v1/chaos/{name}/stop` | Stop an experiment |
//! | POST | `/api/v1/infrastructure/plan` | Diff desired vs. current |
//! | POST | `/api/v1/infrastructure/apply` | Plan and apply |

pub mod handlers;
pub mod ops_handlers;

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use autopilot_chaos::ChaosRunner;
use autopilot_core::DesiredState;
use autopilot_health::HealthMonitor;
use autopilot_platform::PushedMetrics;
use autopilot_reconcile::InfrastructureReconciler;
use autopilot_rollout::DeploymentOrchestrator;
use autopilot_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    /// Configured service names.
    pub services: Arc<BTreeSet<String>>,
    pub orchestrator: Arc<DeploymentOrchestrator>,
    pub monitor: Arc<HealthMonitor>,
    pub chaos: Arc<ChaosRunner>,
    pub reconciler: Arc<InfrastructureReconciler>,
    /// Desired infrastructure from the config file, if any.
    pub desired: Option<Arc<DesiredState>>,
    /// Present when metrics are fed through the API.
    pub pushed: Option<PushedMetrics>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/deployments", get(handlers::list_deployments))
        .route("/deployments/{id}", get(handlers::get_deployment))
        .route("/deployments/{id}/stop", post(handlers::stop_deployment))
        .route("/services/{service}/deployments", post(handlers::start_deployment))
        .route("/services/{service}/verdict", get(handlers::get_verdict))
        .route("/services/{service}/metrics", post(handlers::push_metrics))
        .route("/services/{service}/scaling", get(handlers::scaling_history))
        .route("/scaling", get(handlers::list_scaling))
        .route("/chaos", get(ops_handlers::list_chaos))
        .route("/chaos/{name}/run", post(ops_handlers::run_chaos))
        .route("/chaos/{name}/stop", post(ops_handlers::stop_chaos))
        .route("/infrastructure/plan", post(ops_handlers::plan_infrastructure))
        .route("/infrastructure/apply", post(ops_handlers::apply_infrastructure))
        .with_state(state);

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .nest("/api/v1", api_routes)
}
