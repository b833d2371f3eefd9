//! End-to-end scenarios through a fully assembled daemon on the
//! simulated platform.

use std::time::Duration;

use tokio::sync::watch;

use autopilot_core::*;
use autopilot_health::HealOutcome;
use autopilot_platform::SimulatedPlatform;
use autopilot_state::StateStore;
use autopilotd::{Autopilot, Collaborators};

const CONFIG: &str = r#"
[autoscale]
interval = "30s"

[health]
interval = "30s"
timeout = "5s"
heal_interval = "30s"

[deployment]
strategy = "canary"
canary_stages = [
    { percentage = 10, duration = "0s" },
    { percentage = 100, duration = "0s" },
]

[[services]]
name = "api"
endpoints = ["http://api/health"]

[services.scaling]
min = 2
max = 20
target_cpu = 70.0
target_memory = 80.0
scale_up_threshold = 80.0
scale_down_threshold = 30.0
cooldown = "5m"

[[services.playbooks]]
name = "restart-unhealthy"
triggers = ["unhealthy"]

[[services.playbooks.actions]]
action = { type = "restart" }
critical = true
wait_after = "30s"

[[chaos]]
name = "api-latency"
service = "api"
duration = "2m"
sample_interval = "30s"

[chaos.hypothesis]
description = "api tolerates 200ms extra latency"

[chaos.fault]
type = "network-latency"
params = { latency_ms = "200" }

[infrastructure.resources.db]
critical = true
config = { size = "large" }
"#;

fn metrics(cpu: f64, memory: f64) -> ServiceMetrics {
    ServiceMetrics {
        cpu,
        memory,
        error_rate: 0.2,
        response_time_ms: 90.0,
        request_count: 1000,
    }
}

fn autopilot(sim: &SimulatedPlatform) -> Autopilot {
    let config = AutopilotConfig::from_toml_str(CONFIG).unwrap();
    let store = StateStore::open_in_memory().unwrap();
    Autopilot::assemble(config, store, Collaborators::simulated(sim))
}

#[tokio::test]
async fn overloaded_service_scales_up_by_half() {
    let sim = SimulatedPlatform::new();
    sim.set_instances("api", 2).await;
    sim.set_metrics("api", metrics(85.0, 40.0)).await;
    let ap = autopilot(&sim);
    let mut events = ap.events.subscribe();

    let decisions = ap.autoscaler.evaluate_all().await;

    assert_eq!(decisions.len(), 1);
    let (service, decision) = &decisions[0];
    assert_eq!(service, "api");
    assert_eq!(decision.action, ScaleAction::ScaleUp);
    assert_eq!((decision.from, decision.to), (2, 3));
    assert_eq!(sim.instances("api").await, Some(3));
    assert_eq!(events.recv().await.unwrap().name(), "automation:scaled");
    assert_eq!(ap.store.list_scaling_events("api", 10).unwrap().len(), 1);

    // Still hot, but inside the cooldown window.
    let again = ap.autoscaler.evaluate_all().await;
    assert!(again[0].1.is_none());
    assert_eq!(sim.instances("api").await, Some(3));
}

#[tokio::test(start_paused = true)]
async fn instant_canary_completes_with_two_stages() {
    let sim = SimulatedPlatform::new();
    sim.set_metrics("api", metrics(40.0, 40.0)).await;
    let ap = autopilot(&sim);

    let d = ap
        .orchestrator
        .deploy("api", ArtifactConfig::version("v2.0.0"), None)
        .await
        .unwrap();

    assert_eq!(d.state, DeploymentState::Completed);
    assert_eq!(d.stages.len(), 2);
    assert!(d.stages.iter().all(|s| s.result == StageResult::Success));
    assert_eq!(
        ap.store.get_deployment(&d.id).unwrap().unwrap().state,
        DeploymentState::Completed
    );
}

#[tokio::test(start_paused = true)]
async fn unhealthy_service_is_remediated() {
    let sim = SimulatedPlatform::new();
    let down = Some(EndpointResponse {
        status_code: 503,
        duration_ms: 10,
    });
    let up = Some(EndpointResponse {
        status_code: 200,
        duration_ms: 10,
    });
    sim.script_endpoint("http://api/health", vec![down, up]).await;
    let ap = autopilot(&sim);
    let (_tx, cancel) = watch::channel(false);

    let verdict = ap.monitor.refresh("api").await;
    assert!(!verdict.healthy);

    let outcomes = ap.healer.heal_all(&cancel).await;
    assert_eq!(outcomes.len(), 1);
    let HealOutcome::Remediated(report) = &outcomes[0] else {
        panic!("expected a remediation, got {:?}", outcomes[0]);
    };
    assert_eq!(report.playbook, "restart-unhealthy");
    assert!(report.success);
    assert_eq!(sim.calls_to("restart").await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn chaos_run_reverts_what_it_injects() {
    let sim = SimulatedPlatform::new();
    sim.set_metrics("api", metrics(40.0, 40.0)).await;
    let ap = autopilot(&sim);

    let result = ap.chaos.run_named("api-latency").await.unwrap();

    assert!(result.conclusion.hypothesis_verified);
    assert_eq!(sim.fault_counts().await, (1, 1));
    assert_eq!(ap.store.list_chaos_results().unwrap().len(), 1);
}

#[tokio::test]
async fn configured_infrastructure_converges() {
    let sim = SimulatedPlatform::new();
    sim.set_resource("stale", serde_json::json!({})).await;
    let ap = autopilot(&sim);
    let desired = ap.config.infrastructure.clone().unwrap();

    let report = ap.reconciler.reconcile(&desired).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.summary.total, 2);
    assert!(ap.reconciler.plan(&desired).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn background_tasks_stop_on_shutdown() {
    let sim = SimulatedPlatform::new();
    sim.set_instances("api", 2).await;
    sim.set_metrics("api", metrics(85.0, 40.0)).await;
    let ap = autopilot(&sim);

    let (tx, rx) = watch::channel(false);
    let handles = ap.start(rx).await;
    assert_eq!(ap.monitor.active_monitors().await, vec!["api".to_string()]);

    let deployment = ap
        .orchestrator
        .spawn(
            "api",
            ArtifactConfig::version("v2.0.0"),
            Some(DeploymentStrategy::BlueGreen),
        )
        .await
        .unwrap();
    let chaos_run = ap.chaos.start("api-latency").await.unwrap();

    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(sim.instances("api").await, Some(3));

    tx.send(true).unwrap();
    ap.stop().await;
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
    assert!(ap.monitor.active_monitors().await.is_empty());

    let stored = ap.store.get_deployment(&deployment.id).unwrap().unwrap();
    assert_eq!(stored.state, DeploymentState::RolledBack);
    assert_eq!(stored.failure.unwrap().reason, "cancelled");

    let result = ap.chaos.result(&chaos_run).unwrap().unwrap();
    assert_eq!(result.error.as_deref(), Some("cancelled"));
    assert_eq!(sim.fault_counts().await, (1, 1));
    assert!(ap.chaos.running().await.is_empty());
}

#[tokio::test]
async fn cooldown_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("autopilot.redb");
    let sim = SimulatedPlatform::new();
    sim.set_instances("api", 2).await;
    sim.set_metrics("api", metrics(85.0, 40.0)).await;

    {
        let config = AutopilotConfig::from_toml_str(CONFIG).unwrap();
        let store = StateStore::open(&path).unwrap();
        let ap = Autopilot::assemble(config, store, Collaborators::simulated(&sim));
        let decisions = ap.autoscaler.evaluate_all().await;
        assert_eq!(decisions[0].1.to, 3);
    }

    let config = AutopilotConfig::from_toml_str(CONFIG).unwrap();
    let store = StateStore::open(&path).unwrap();
    let ap = Autopilot::assemble(config, store, Collaborators::simulated(&sim));
    let restored = ap.autoscaler.scaling_state("api").await.unwrap();
    assert_eq!(restored.instances, 3);

    let decisions = ap.autoscaler.evaluate_all().await;
    assert!(decisions[0].1.is_none());
    assert_eq!(sim.instances("api").await, Some(3));
}
