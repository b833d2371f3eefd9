//! AutoHealer — playbook-driven remediation of unhealthy services.
//!
//! On its own interval the healer reads the latest verdict per service.
//! For an unhealthy service it derives the symptom set, picks the first
//! matching playbook, and runs its steps strictly in order. A failed
//! critical step halts the playbook and escalates. Whatever happened, a
//! fresh health check decides whether the remediation succeeded. With no
//! matching playbook the healer raises `incident_required` instead of
//! guessing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use autopilot_core::*;

use crate::monitor::HealthMonitor;
use crate::registry::RemediationRegistry;

/// What one remediation run did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemediationReport {
    pub service: String,
    pub playbook: String,
    /// One record per executed step; nothing after a critical failure.
    pub results: Vec<ActionRecord>,
    /// The post-check verdict, not the steps' own success flags.
    pub success: bool,
    pub escalation: Option<String>,
    pub post_check: HealthVerdict,
}

/// Result of healing one verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HealOutcome {
    Healthy,
    IncidentRequired { symptoms: Vec<Symptom> },
    Remediated(RemediationReport),
    /// Stopped by shutdown between steps.
    Cancelled { playbook: String, results: Vec<ActionRecord> },
    /// Another remediation for the service is still running.
    InProgress,
}

pub struct AutoHealer {
    monitor: Arc<HealthMonitor>,
    runner: Arc<dyn ActionRunner>,
    registry: RemediationRegistry,
    events: EventBus,
    high_response_time: Duration,
    in_flight: Mutex<HashSet<String>>,
}

impl AutoHealer {
    pub fn new(
        monitor: Arc<HealthMonitor>,
        runner: Arc<dyn ActionRunner>,
        registry: RemediationRegistry,
        events: EventBus,
        high_response_time: Duration,
    ) -> Self {
        Self {
            monitor,
            runner,
            registry,
            events,
            high_response_time,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn registry(&self) -> &RemediationRegistry {
        &self.registry
    }

    /// Symptoms of an unhealthy verdict. Empty when healthy.
    pub fn symptoms(&self, verdict: &HealthVerdict) -> Vec<Symptom> {
        if verdict.healthy {
            return Vec::new();
        }
        let mut symptoms = vec![Symptom::Unhealthy];
        if verdict.avg_response_time_ms > self.high_response_time.as_millis() as f64 {
            symptoms.push(Symptom::HighResponseTime);
        }
        symptoms
    }

    /// Heal one service given its latest verdict.
    pub async fn heal(
        &self,
        verdict: &HealthVerdict,
        cancel: watch::Receiver<bool>,
    ) -> HealOutcome {
        let service = verdict.service.as_str();
        let symptoms = self.symptoms(verdict);
        if symptoms.is_empty() {
            return HealOutcome::Healthy;
        }

        let Some(playbook) = self.registry.select(service, &symptoms) else {
            warn!(%service, ?symptoms, "no remediation playbook matches; incident required");
            self.events.emit(AutomationEvent::HealthIssue {
                service: service.to_string(),
                action: "incident_required".to_string(),
                detail: format!("no playbook matches symptoms {symptoms:?}"),
                verdict: Some(verdict.clone()),
            });
            return HealOutcome::IncidentRequired { symptoms };
        };

        if !self.in_flight.lock().await.insert(service.to_string()) {
            debug!(%service, "remediation already running");
            return HealOutcome::InProgress;
        }
        let outcome = self.execute(service, playbook, cancel).await;
        self.in_flight.lock().await.remove(service);
        outcome
    }

    /// Run `playbook` for `service`, then re-check health.
    pub async fn execute(
        &self,
        service: &str,
        playbook: &Playbook,
        mut cancel: watch::Receiver<bool>,
    ) -> HealOutcome {
        info!(%service, playbook = %playbook.name, steps = playbook.actions.len(), "running remediation playbook");

        let mut results = Vec::with_capacity(playbook.actions.len());
        let mut escalation = None;

        for (i, step) in playbook.actions.iter().enumerate() {
            let record = self.run_step(service, step).await;
            debug!(
                %service,
                step = i,
                action = %record.action,
                success = record.success,
                "remediation step finished"
            );
            let halt = !record.success && step.critical;
            if halt {
                escalation = Some(format!(
                    "critical action {} failed: {}",
                    record.action, record.output
                ));
            }
            results.push(record);
            if halt {
                break;
            }

            if let Some(wait) = step.wait_after {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.changed() => {
                        info!(%service, playbook = %playbook.name, "remediation cancelled");
                        return HealOutcome::Cancelled {
                            playbook: playbook.name.clone(),
                            results,
                        };
                    }
                }
            }
        }

        let post_check = self.monitor.refresh(service).await;
        let report = RemediationReport {
            service: service.to_string(),
            playbook: playbook.name.clone(),
            results,
            success: post_check.healthy,
            escalation,
            post_check,
        };

        if let Some(reason) = &report.escalation {
            warn!(%service, playbook = %playbook.name, %reason, "remediation escalated");
            self.events.emit(AutomationEvent::Error {
                kind: ErrorKind::Remediation,
                service: Some(service.to_string()),
                error: reason.clone(),
                decision: None,
                playbook: Some(playbook.name.clone()),
            });
        } else {
            info!(%service, playbook = %playbook.name, healthy = report.success, "remediation finished");
        }
        self.events.emit(AutomationEvent::Remediation {
            service: service.to_string(),
            playbook: playbook.name.clone(),
            results: report.results.clone(),
            success: report.success,
            escalation: report.escalation.clone(),
        });

        HealOutcome::Remediated(report)
    }

    /// Dispatch one step to the action runner.
    async fn run_step(&self, service: &str, step: &PlaybookStep) -> ActionRecord {
        let runner = self.runner.as_ref();
        let outcome = match &step.action {
            RemediationAction::Restart { params } => runner.restart(service, params).await,
            RemediationAction::Scale { delta } => runner.scale(service, *delta).await,
            RemediationAction::ClearCache => runner.clear_cache(service).await,
            RemediationAction::ResetConnections => runner.reset_connections(service).await,
            RemediationAction::Failover { params } => runner.failover(service, params).await,
            RemediationAction::RunScript { script } => runner.run_script(script).await,
            RemediationAction::Wait => Ok(ActionOutcome::ok("waited")),
            RemediationAction::Unknown => Ok(ActionOutcome::failed("unknown action type")),
        };
        let outcome = outcome.unwrap_or_else(|e| ActionOutcome::failed(e.to_string()));
        ActionRecord {
            action: step.action.kind().to_string(),
            critical: step.critical,
            success: outcome.success,
            output: outcome.output,
        }
    }

    /// Heal every service whose latest verdict is unhealthy, concurrently.
    pub async fn heal_all(self: &Arc<Self>, cancel: &watch::Receiver<bool>) -> Vec<HealOutcome> {
        let mut tasks = JoinSet::new();
        for verdict in self.monitor.latest_all().await {
            if verdict.healthy {
                continue;
            }
            let healer = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { healer.heal(&verdict, cancel).await });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(error = %e, "remediation task failed");
                    self.events.emit(AutomationEvent::Error {
                        kind: ErrorKind::Remediation,
                        service: None,
                        error: e.to_string(),
                        decision: None,
                        playbook: None,
                    });
                }
            }
        }
        outcomes
    }

    /// Run the healer loop until shutdown.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "auto-healer started");
        let cancel = shutdown.clone();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.heal_all(&cancel).await;
                }
                _ = shutdown.changed() => {
                    info!("auto-healer shutting down");
                    break;
                }
            }
        }
    }
}
