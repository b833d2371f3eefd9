//! Engine assembly and task lifecycle.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use autopilot_api::ApiState;
use autopilot_autoscale::AutoScaler;
use autopilot_chaos::ChaosRunner;
use autopilot_core::{AutopilotConfig, EventBus};
use autopilot_health::{AutoHealer, HealthChecker, HealthMonitor, RemediationRegistry, ResourceSweep};
use autopilot_platform::PushedMetrics;
use autopilot_reconcile::InfrastructureReconciler;
use autopilot_rollout::DeploymentOrchestrator;
use autopilot_state::StateStore;

use crate::collaborators::Collaborators;
use crate::event_log::log_events;

/// Every engine, wired onto one store and one event bus.
pub struct Autopilot {
    pub config: AutopilotConfig,
    pub store: StateStore,
    pub events: EventBus,
    pub autoscaler: Arc<AutoScaler>,
    pub monitor: Arc<HealthMonitor>,
    pub healer: Arc<AutoHealer>,
    pub sweep: Arc<ResourceSweep>,
    pub orchestrator: Arc<DeploymentOrchestrator>,
    pub chaos: Arc<ChaosRunner>,
    pub reconciler: Arc<InfrastructureReconciler>,
    pushed: Option<PushedMetrics>,
}

impl Autopilot {
    pub fn assemble(config: AutopilotConfig, store: StateStore, collab: Collaborators) -> Self {
        let events = EventBus::new();

        let autoscaler = AutoScaler::new(
            collab.metrics.clone(),
            collab.platform.clone(),
            store.clone(),
            events.clone(),
            config.scaling_policies(),
        );

        let checker = Arc::new(HealthChecker::from_services(
            collab.platform.clone(),
            config.health.timeout,
            &config.services,
        ));
        let monitor = Arc::new(HealthMonitor::new(checker.clone()));
        let healer = AutoHealer::new(
            monitor.clone(),
            collab.runner.clone(),
            RemediationRegistry::from_services(&config.services),
            events.clone(),
            config.health.high_response_time,
        );
        let sweep = ResourceSweep::new(
            collab.host.clone(),
            collab.runner.clone(),
            events.clone(),
            config.resource_sweep.clone().unwrap_or_default(),
        );

        let orchestrator = DeploymentOrchestrator::new(
            collab.platform.clone(),
            collab.metrics.clone(),
            checker,
            store.clone(),
            events.clone(),
            config.deployment.clone(),
        );
        let chaos = ChaosRunner::new(
            collab.platform.clone(),
            collab.metrics.clone(),
            store.clone(),
            events.clone(),
            config.chaos.clone(),
        );
        let reconciler = InfrastructureReconciler::new(collab.resources.clone());

        info!(
            services = config.services.len(),
            scaling_policies = autoscaler.policies().len(),
            experiments = config.chaos.len(),
            strategy = %config.deployment.strategy,
            "engines assembled"
        );

        Self {
            config,
            store,
            events,
            autoscaler: Arc::new(autoscaler),
            monitor,
            healer: Arc::new(healer),
            sweep: Arc::new(sweep),
            orchestrator: Arc::new(orchestrator),
            chaos: Arc::new(chaos),
            reconciler: Arc::new(reconciler),
            pushed: collab.pushed,
        }
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            store: self.store.clone(),
            services: Arc::new(
                self.config
                    .services
                    .iter()
                    .map(|s| s.name.clone())
                    .collect::<BTreeSet<_>>(),
            ),
            orchestrator: self.orchestrator.clone(),
            monitor: self.monitor.clone(),
            chaos: self.chaos.clone(),
            reconciler: self.reconciler.clone(),
            desired: self.config.infrastructure.clone().map(Arc::new),
            pushed: self.pushed.clone(),
        }
    }

    pub fn router(&self) -> Router {
        autopilot_api::build_router(self.api_state())
    }

    /// Spawn the event log and every enabled periodic loop.
    ///
    /// Each loop exits when `shutdown` flips to `true`.
    pub async fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let rx = self.events.subscribe();
        let log_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            log_events(rx, log_shutdown).await;
        }));

        if self.config.autoscale.enabled {
            let autoscaler = self.autoscaler.clone();
            let interval = self.config.autoscale.interval;
            let autoscale_shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                autoscaler.run(interval, autoscale_shutdown).await;
            }));
        }

        if self.config.health.enabled {
            self.monitor.start_all(self.config.health.interval).await;
            let healer = self.healer.clone();
            let interval = self.config.health.heal_interval;
            let heal_shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                healer.run(interval, heal_shutdown).await;
            }));
        }

        let sweep = self.sweep.clone();
        let sweep_shutdown = shutdown;
        handles.push(tokio::spawn(async move {
            sweep.run(sweep_shutdown).await;
        }));

        info!(tasks = handles.len(), "background tasks started");
        handles
    }

    /// Stop the health monitors, then stop in-flight deployments and
    /// chaos runs and wait for their rollback and revert paths.
    pub async fn stop(&self) {
        self.monitor.stop_all().await;
        tokio::join!(self.orchestrator.shutdown(), self.chaos.shutdown());
        info!("automation engines stopped");
    }
}
