//! Operator API round-trips through the daemon's router.

use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use autopilot_core::AutopilotConfig;
use autopilot_platform::SimulatedPlatform;
use autopilot_state::StateStore;
use autopilotd::{Autopilot, Collaborators};

const CONFIG: &str = r#"
[deployment]
strategy = "blue-green"
health_check_grace_period = "30s"
monitoring_duration = "1m"
monitoring_interval = "30s"

[[services]]
name = "api"
endpoints = ["http://api/health"]

[services.scaling]
min = 1
max = 4
scale_up_threshold = 80.0
scale_down_threshold = 20.0
cooldown = "1m"
"#;

fn daemon(sim: &SimulatedPlatform) -> (Autopilot, Router) {
    let config = AutopilotConfig::from_toml_str(CONFIG).unwrap();
    let ap = Autopilot::assemble(
        config,
        StateStore::open_in_memory().unwrap(),
        Collaborators::simulated(sim),
    );
    let router = ap.router();
    (ap, router)
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&v).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn healthz_answers() {
    let (_, router) = daemon(&SimulatedPlatform::new());
    let (status, body) = send(&router, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test(start_paused = true)]
async fn deployment_lifecycle_over_http() {
    let sim = SimulatedPlatform::new();
    sim.set_metrics(
        "api",
        autopilot_core::ServiceMetrics {
            cpu: 30.0,
            memory: 30.0,
            error_rate: 0.1,
            response_time_ms: 50.0,
            request_count: 10,
        },
    )
    .await;
    let (_, router) = daemon(&sim);

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/services/api/deployments",
        Some(json!({ "version": "v2.1.0" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("deploy-api-"));

    let (status, _) = send(
        &router,
        "POST",
        "/api/v1/services/api/deployments",
        Some(json!({ "version": "v2.2.0" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    tokio::time::sleep(Duration::from_secs(90)).await;

    let (status, body) = send(&router, "GET", &format!("/api/v1/deployments/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "completed");
    assert_eq!(body["data"]["stages"].as_array().unwrap().len(), 5);

    let (status, _) = send(&router, "POST", &format!("/api/v1/deployments/{id}/stop"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = send(&router, "GET", "/api/v1/deployments", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_over_http_rolls_back() {
    let sim = SimulatedPlatform::new();
    sim.set_metrics(
        "api",
        autopilot_core::ServiceMetrics {
            cpu: 30.0,
            memory: 30.0,
            error_rate: 0.1,
            response_time_ms: 50.0,
            request_count: 10,
        },
    )
    .await;
    let (_, router) = daemon(&sim);

    let (_, body) = send(
        &router,
        "POST",
        "/api/v1/services/api/deployments",
        Some(json!({ "version": "v3" })),
    )
    .await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    tokio::time::sleep(Duration::from_secs(10)).await;
    let (status, _) = send(&router, "POST", &format!("/api/v1/deployments/{id}/stop"), None).await;
    assert_eq!(status, StatusCode::OK);

    tokio::time::sleep(Duration::from_secs(60)).await;
    let (_, body) = send(&router, "GET", &format!("/api/v1/deployments/{id}"), None).await;
    assert_eq!(body["data"]["state"], "rolled-back");
    assert_eq!(body["data"]["failure"]["reason"], "cancelled");
}

#[tokio::test]
async fn rolling_is_refused_over_http() {
    let (_, router) = daemon(&SimulatedPlatform::new());
    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/services/api/deployments",
        Some(json!({ "version": "v2", "strategy": "rolling" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn scaling_and_verdict_endpoints() {
    let sim = SimulatedPlatform::new();
    sim.set_instances("api", 1).await;
    sim.set_metrics(
        "api",
        autopilot_core::ServiceMetrics {
            cpu: 95.0,
            memory: 30.0,
            ..Default::default()
        },
    )
    .await;
    let (ap, router) = daemon(&sim);
    ap.autoscaler.evaluate_all().await;

    let (status, body) = send(&router, "GET", "/api/v1/scaling", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["service"], "api");
    assert_eq!(body["data"][0]["instances"], 2);

    let (_, body) = send(&router, "GET", "/api/v1/services/api/scaling", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = send(&router, "GET", "/api/v1/services/api/verdict", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["healthy"], true);

    let (status, _) = send(&router, "GET", "/api/v1/services/nope/verdict", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn infrastructure_without_configuration_needs_a_body() {
    let (_, router) = daemon(&SimulatedPlatform::new());

    let (status, _) = send(&router, "POST", "/api/v1/infrastructure/plan", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let desired = json!({ "resources": { "cache": { "config": { "nodes": 3 } } } });
    let (status, body) = send(&router, "POST", "/api/v1/infrastructure/apply", Some(desired)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["summary"]["successful"], 1);
}
