//! Blue-green and canary drivers.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use autopilot_core::*;

use crate::monitor::monitor_deployment;
use crate::orchestrator::{DeploymentOrchestrator, StageFailure};

const GREEN: &str = "green";
const BLUE: &str = "blue";

fn begin_stage(deployment: &mut Deployment, name: String, percentage: Option<u32>) {
    deployment.stages.push(StageRecord {
        name,
        started_at_ms: epoch_millis(),
        ended_at_ms: None,
        result: StageResult::Running,
        percentage,
        reason: None,
        metrics: None,
    });
}

/// Close the running stage. Failures become a `StageFailure`.
fn end_stage(
    deployment: &mut Deployment,
    outcome: Result<(), String>,
    metrics: Option<ServiceMetrics>,
) -> Result<(), StageFailure> {
    let Some(stage) = deployment.stages.last_mut() else {
        return Ok(());
    };
    stage.ended_at_ms = Some(epoch_millis());
    stage.metrics = metrics;
    match outcome {
        Ok(()) => {
            stage.result = StageResult::Success;
            Ok(())
        }
        Err(reason) => {
            stage.result = StageResult::Failed;
            stage.reason = Some(reason.clone());
            Err(StageFailure {
                stage: stage.name.clone(),
                reason,
                metrics,
            })
        }
    }
}

impl DeploymentOrchestrator {
    /// `deploy-green → health-check → switch-traffic → monitoring → cleanup`.
    pub(crate) async fn blue_green(
        &self,
        deployment: &mut Deployment,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(), StageFailure> {
        let service = deployment.service.clone();

        begin_stage(deployment, "deploy-green".to_string(), None);
        self.checkpoint(deployment).await;
        let handle = self
            .platform
            .deploy_to_slot(&service, GREEN, &deployment.config)
            .await;
        let handle = match handle {
            Ok(h) => {
                end_stage(deployment, Ok(()), None)?;
                h
            }
            Err(e) => return end_stage(deployment, Err(e.to_string()), None),
        };

        begin_stage(deployment, "health-check".to_string(), None);
        self.checkpoint(deployment).await;
        let endpoints = if handle.endpoints.is_empty() {
            self.checker.endpoints(&service).to_vec()
        } else {
            handle.endpoints.clone()
        };
        let healthy = self.wait_for_healthy(&service, &endpoints, stop).await;
        end_stage(deployment, healthy, None)?;

        begin_stage(deployment, "switch-traffic".to_string(), None);
        self.checkpoint(deployment).await;
        let target = TrafficTarget::Slot {
            slot: GREEN.to_string(),
        };
        let switched = self
            .platform
            .switch_traffic(&service, &target)
            .await
            .map_err(|e| e.to_string());
        end_stage(deployment, switched, None)?;

        begin_stage(deployment, "monitoring".to_string(), None);
        self.checkpoint(deployment).await;
        let outcome = monitor_deployment(
            &self.checker,
            self.metrics.as_ref(),
            &service,
            self.policy.monitoring_duration,
            self.policy.monitoring_interval,
            &self.policy.thresholds,
            stop,
        )
        .await;
        let metrics = outcome.last_metrics();
        let result = match outcome.reason {
            Some(reason) if !outcome.healthy => Err(reason),
            _ => Ok(()),
        };
        end_stage(deployment, result, metrics)?;

        begin_stage(deployment, "cleanup".to_string(), None);
        self.checkpoint(deployment).await;
        let cleaned = self
            .platform
            .cleanup_slot(&service, BLUE)
            .await
            .map_err(|e| e.to_string());
        end_stage(deployment, cleaned, None)
    }

    /// Poll the new slot until healthy or the grace period runs out.
    async fn wait_for_healthy(
        &self,
        service: &str,
        endpoints: &[String],
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(), String> {
        let grace = self.policy.health_check_grace_period;
        let poll = self.policy.health_check_poll;
        let started = tokio::time::Instant::now();

        loop {
            if *stop.borrow() {
                return Err("cancelled".to_string());
            }
            let verdict = self.checker.check_endpoints(service, endpoints).await;
            if verdict.healthy {
                debug!(%service, "new slot is healthy");
                return Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed >= grace {
                return Err(format!(
                    "not healthy within {}",
                    format_duration(grace)
                ));
            }
            let wait = poll.min(grace - elapsed).max(Duration::from_millis(1));
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                Ok(()) = stop.changed() => {}
            }
        }
    }

    /// One `canary-{p}%` stage per configured percentage.
    pub(crate) async fn canary(
        &self,
        deployment: &mut Deployment,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(), StageFailure> {
        let service = deployment.service.clone();
        let version = deployment.config.version.clone();

        for stage in &self.policy.canary_stages {
            begin_stage(
                deployment,
                format!("canary-{}%", stage.percentage),
                Some(stage.percentage),
            );
            self.checkpoint(deployment).await;

            if *stop.borrow() {
                return end_stage(deployment, Err("cancelled".to_string()), None);
            }

            let target = TrafficTarget::Canary {
                version: version.clone(),
                percentage: stage.percentage,
            };
            if let Err(e) = self.platform.switch_traffic(&service, &target).await {
                let snapshot = self.metrics.get_metrics(&service).await.ok();
                return end_stage(deployment, Err(e.to_string()), snapshot);
            }
            info!(%service, %version, percentage = stage.percentage, "canary traffic shifted");

            if !stage.duration.is_zero() {
                let outcome = monitor_deployment(
                    &self.checker,
                    self.metrics.as_ref(),
                    &service,
                    stage.duration,
                    self.policy.monitoring_interval,
                    &self.policy.thresholds,
                    stop,
                )
                .await;
                if !outcome.healthy {
                    let reason = outcome
                        .reason
                        .clone()
                        .unwrap_or_else(|| "monitoring failed".to_string());
                    return end_stage(
                        deployment,
                        Err(format!("canary stage {}% failed monitoring: {reason}", stage.percentage)),
                        outcome.last_metrics(),
                    );
                }
            }

            let snapshot = self.metrics.get_metrics(&service).await.ok();
            end_stage(deployment, Ok(()), snapshot)?;
            self.checkpoint(deployment).await;
        }
        Ok(())
    }
}
