//! DeploymentOrchestrator — drives a deployment to a terminal state.
//!
//! `prepare` validates the request and registers the record; `drive`
//! runs the chosen strategy and, on any stage failure (or a stop
//! request), the rollback path. Every transition is checkpointed to the
//! registry and the state store.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use autopilot_core::config::DeploymentPolicy;
use autopilot_core::*;
use autopilot_health::HealthChecker;
use autopilot_state::StateStore;

use crate::error::{RolloutError, RolloutResult};
use crate::registry::DeploymentRegistry;

/// Why a stage failed, carried to the rollback path.
#[derive(Debug, Clone)]
pub(crate) struct StageFailure {
    pub stage: String,
    pub reason: String,
    pub metrics: Option<ServiceMetrics>,
}

/// A registered deployment that has not started running yet.
pub struct PreparedDeployment {
    pub deployment: Deployment,
    pub(crate) stop: watch::Receiver<bool>,
}

pub struct DeploymentOrchestrator {
    pub(crate) platform: Arc<dyn PlatformController>,
    pub(crate) metrics: Arc<dyn MetricsSource>,
    pub(crate) checker: Arc<HealthChecker>,
    store: StateStore,
    events: EventBus,
    pub(crate) policy: DeploymentPolicy,
    registry: DeploymentRegistry,
    /// Deployments driven in the background by `spawn`.
    tasks: Mutex<JoinSet<()>>,
}

fn lock_tasks(tasks: &Mutex<JoinSet<()>>) -> MutexGuard<'_, JoinSet<()>> {
    tasks.lock().unwrap_or_else(|e| e.into_inner())
}

impl DeploymentOrchestrator {
    pub fn new(
        platform: Arc<dyn PlatformController>,
        metrics: Arc<dyn MetricsSource>,
        checker: Arc<HealthChecker>,
        store: StateStore,
        events: EventBus,
        policy: DeploymentPolicy,
    ) -> Self {
        Self {
            platform,
            metrics,
            checker,
            store,
            events,
            policy,
            registry: DeploymentRegistry::new(),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn policy(&self) -> &DeploymentPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &DeploymentRegistry {
        &self.registry
    }

    /// Create and register a deployment record in `preparing`.
    ///
    /// `strategy` overrides the configured default. Rolling is refused
    /// before any record exists.
    pub async fn prepare(
        &self,
        service: &str,
        config: ArtifactConfig,
        strategy: Option<DeploymentStrategy>,
    ) -> RolloutResult<PreparedDeployment> {
        let strategy = strategy.unwrap_or(self.policy.strategy);
        if strategy == DeploymentStrategy::Rolling {
            return Err(RolloutError::UnsupportedStrategy(strategy));
        }

        let id = format!("deploy-{service}-{}", uuid::Uuid::new_v4().simple());
        let deployment = Deployment::new(id, service, config, strategy, epoch_millis());
        let stop = self.registry.begin(&deployment).await?;
        if let Err(e) = self.store.put_deployment(&deployment) {
            self.registry.update(&failed_to_start(&deployment)).await;
            return Err(e.into());
        }

        info!(
            deployment = %deployment.id,
            %service,
            %strategy,
            version = %deployment.config.version,
            "deployment prepared"
        );
        Ok(PreparedDeployment { deployment, stop })
    }

    /// Run a prepared deployment to a terminal state.
    pub async fn drive(&self, prepared: PreparedDeployment) -> Deployment {
        let PreparedDeployment {
            mut deployment,
            mut stop,
        } = prepared;

        deployment.state = DeploymentState::Deploying;
        self.checkpoint(&deployment).await;

        let result = match deployment.strategy {
            DeploymentStrategy::BlueGreen => self.blue_green(&mut deployment, &mut stop).await,
            DeploymentStrategy::Canary => self.canary(&mut deployment, &mut stop).await,
            DeploymentStrategy::Rolling => Err(StageFailure {
                stage: "preparing".to_string(),
                reason: RolloutError::UnsupportedStrategy(DeploymentStrategy::Rolling).to_string(),
                metrics: None,
            }),
        };

        match result {
            Ok(()) => {
                deployment.state = DeploymentState::Completed;
                deployment.ended_at_ms = Some(epoch_millis());
                self.checkpoint(&deployment).await;
                info!(deployment = %deployment.id, service = %deployment.service, "deployment completed");
                self.events.emit(AutomationEvent::DeploymentCompleted {
                    deployment: deployment.clone(),
                });
            }
            Err(failure) => self.fail(&mut deployment, failure).await,
        }
        deployment
    }

    /// Prepare and drive to completion.
    pub async fn deploy(
        &self,
        service: &str,
        config: ArtifactConfig,
        strategy: Option<DeploymentStrategy>,
    ) -> RolloutResult<Deployment> {
        let prepared = self.prepare(service, config, strategy).await?;
        Ok(self.drive(prepared).await)
    }

    /// Prepare now and drive in a background task; returns the record
    /// as registered.
    pub async fn spawn(
        self: &Arc<Self>,
        service: &str,
        config: ArtifactConfig,
        strategy: Option<DeploymentStrategy>,
    ) -> RolloutResult<Deployment> {
        let prepared = self.prepare(service, config, strategy).await?;
        let deployment = prepared.deployment.clone();
        let orchestrator = self.clone();
        let mut tasks = lock_tasks(&self.tasks);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            orchestrator.drive(prepared).await;
        });
        Ok(deployment)
    }

    pub async fn stop(&self, id: &str) -> RolloutResult<()> {
        match self.registry.stop(id).await {
            Err(RolloutError::NotFound(_)) if self.store.get_deployment(id)?.is_some() => {
                Err(RolloutError::AlreadyFinished(id.to_string()))
            }
            other => other,
        }
    }

    /// Stop every live deployment and wait for the spawned ones to reach
    /// a terminal state.
    pub async fn shutdown(&self) {
        let live = self.registry.stop_all().await;
        if live > 0 {
            info!(deployments = live, "stopping live deployments");
        }
        let mut tasks = std::mem::take(&mut *lock_tasks(&self.tasks));
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "deployment task did not finish cleanly");
            }
        }
    }

    /// Snapshot from the registry, falling back to the store.
    pub async fn get(&self, id: &str) -> RolloutResult<Deployment> {
        if let Some(d) = self.registry.get(id).await {
            return Ok(d);
        }
        self.store
            .get_deployment(id)?
            .ok_or_else(|| RolloutError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> RolloutResult<Vec<Deployment>> {
        let mut all = self.store.list_deployments()?;
        for live in self.registry.list().await {
            match all.iter_mut().find(|d| d.id == live.id) {
                Some(slot) => *slot = live,
                None => all.push(live),
            }
        }
        all.sort_by_key(|d| d.started_at_ms);
        Ok(all)
    }

    /// Publish the current record to the store, then the registry; a
    /// terminal record is only readable from the store afterwards.
    pub(crate) async fn checkpoint(&self, deployment: &Deployment) {
        if let Err(e) = self.store.put_deployment(deployment) {
            warn!(deployment = %deployment.id, error = %e, "failed to persist deployment");
        }
        self.registry.update(deployment).await;
    }

    /// Record the failure and take the rollback path (if enabled).
    async fn fail(&self, deployment: &mut Deployment, failure: StageFailure) {
        warn!(
            deployment = %deployment.id,
            service = %deployment.service,
            stage = %failure.stage,
            reason = %failure.reason,
            "deployment stage failed"
        );
        deployment.failure = Some(FailureReport {
            stage: failure.stage,
            reason: failure.reason,
            metrics: failure.metrics,
        });

        if !self.policy.rollback_on_error {
            deployment.state = DeploymentState::Failed;
            deployment.ended_at_ms = Some(epoch_millis());
            self.checkpoint(deployment).await;
            self.events.emit(AutomationEvent::DeploymentFailed {
                deployment: deployment.clone(),
            });
            return;
        }

        deployment.state = DeploymentState::RollingBack;
        self.checkpoint(deployment).await;

        match self.redeploy_previous(&deployment.service).await {
            Ok(version) => {
                info!(deployment = %deployment.id, %version, "rolled back");
                deployment.state = DeploymentState::RolledBack;
                deployment.rollback_version = Some(version);
                deployment.ended_at_ms = Some(epoch_millis());
                self.checkpoint(deployment).await;
                self.events.emit(AutomationEvent::DeploymentRolledBack {
                    deployment: deployment.clone(),
                });
            }
            Err(e) => {
                error!(
                    deployment = %deployment.id,
                    error = %e,
                    "rollback failed; manual intervention required"
                );
                deployment.state = DeploymentState::RollbackFailed;
                deployment.rollback_error = Some(e.to_string());
                deployment.ended_at_ms = Some(epoch_millis());
                self.checkpoint(deployment).await;
                self.events.emit(AutomationEvent::DeploymentFailed {
                    deployment: deployment.clone(),
                });
            }
        }
    }

    async fn redeploy_previous(&self, service: &str) -> PlatformResult<String> {
        let previous = self.platform.get_previous_version(service).await?;
        self.platform
            .deploy_to_slot(service, "current", &ArtifactConfig::version(&previous.version))
            .await?;
        Ok(previous.version)
    }
}

fn failed_to_start(deployment: &Deployment) -> Deployment {
    let mut d = deployment.clone();
    d.state = DeploymentState::Failed;
    d.ended_at_ms = Some(epoch_millis());
    d
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use autopilot_platform::SimulatedPlatform;

    fn orchestrator(sim: &SimulatedPlatform, policy: DeploymentPolicy) -> Arc<DeploymentOrchestrator> {
        let checker = HealthChecker::new(Arc::new(sim.clone()), Duration::from_secs(5))
            .with_service("api", vec!["http://api/health".to_string()]);
        Arc::new(DeploymentOrchestrator::new(
            Arc::new(sim.clone()),
            Arc::new(sim.clone()),
            Arc::new(checker),
            StateStore::open_in_memory().unwrap(),
            EventBus::new(),
            policy,
        ))
    }

    #[tokio::test]
    async fn rolling_is_refused_without_a_record() {
        let sim = SimulatedPlatform::new();
        let orch = orchestrator(&sim, DeploymentPolicy::default());

        let err = orch
            .deploy("api", ArtifactConfig::version("v2"), Some(DeploymentStrategy::Rolling))
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::UnsupportedStrategy(DeploymentStrategy::Rolling)));
        assert!(err.to_string().contains("not supported"));
        assert!(orch.list().await.unwrap().is_empty());
        assert!(sim.calls().await.is_empty());
    }

    #[tokio::test]
    async fn second_deployment_for_a_service_is_refused() {
        let sim = SimulatedPlatform::new();
        let orch = orchestrator(&sim, DeploymentPolicy::default());

        let first = orch
            .prepare("api", ArtifactConfig::version("v2"), None)
            .await
            .unwrap();
        assert_eq!(first.deployment.state, DeploymentState::Preparing);
        assert!(matches!(
            orch.prepare("api", ArtifactConfig::version("v3"), None).await,
            Err(RolloutError::AlreadyInProgress { .. })
        ));
        assert!(orch.prepare("web", ArtifactConfig::version("v3"), None).await.is_ok());
    }

    fn steady() -> ServiceMetrics {
        ServiceMetrics {
            cpu: 40.0,
            memory: 40.0,
            error_rate: 0.5,
            response_time_ms: 80.0,
            request_count: 100,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_rolls_back_spawned_deployments() {
        let sim = SimulatedPlatform::new();
        sim.set_metrics("api", steady()).await;
        let orch = orchestrator(&sim, DeploymentPolicy::default());

        let d = orch
            .spawn("api", ArtifactConfig::version("v2"), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(45)).await;
        orch.shutdown().await;

        let done = orch.get(&d.id).await.unwrap();
        assert_eq!(done.state, DeploymentState::RolledBack);
        assert_eq!(done.failure.unwrap().reason, "cancelled");
        assert!(orch.registry().list().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn finished_deployment_reports_already_finished() {
        let sim = SimulatedPlatform::new();
        sim.set_metrics("api", steady()).await;
        let policy = DeploymentPolicy {
            strategy: DeploymentStrategy::Canary,
            canary_stages: vec![CanaryStage {
                percentage: 100,
                duration: Duration::ZERO,
            }],
            ..DeploymentPolicy::default()
        };
        let orch = orchestrator(&sim, policy);

        let d = orch
            .deploy("api", ArtifactConfig::version("v2"), None)
            .await
            .unwrap();
        assert_eq!(d.state, DeploymentState::Completed);
        assert!(orch.registry().get(&d.id).await.is_none());
        assert_eq!(orch.get(&d.id).await.unwrap(), d);
        assert!(matches!(
            orch.stop(&d.id).await,
            Err(RolloutError::AlreadyFinished(_))
        ));
        assert!(matches!(orch.stop("nope").await, Err(RolloutError::NotFound(_))));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let sim = SimulatedPlatform::new();
        let orch = orchestrator(&sim, DeploymentPolicy::default());
        assert!(matches!(orch.get("nope").await, Err(RolloutError::NotFound(_))));
    }
}
