//! Resource sweep — periodic host disk and memory check.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use autopilot_core::config::ResourceSweepConfig;
use autopilot_core::*;

/// Service name used on events about the host itself.
const HOST: &str = "host";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub disk_usage: Option<f64>,
    pub memory_usage: Option<f64>,
    /// Present when the cleanup script ran.
    pub cleanup: Option<ActionOutcome>,
    pub memory_alert: bool,
}

pub struct ResourceSweep {
    host: Arc<dyn HostUsage>,
    runner: Arc<dyn ActionRunner>,
    events: EventBus,
    config: ResourceSweepConfig,
}

impl ResourceSweep {
    pub fn new(
        host: Arc<dyn HostUsage>,
        runner: Arc<dyn ActionRunner>,
        events: EventBus,
        config: ResourceSweepConfig,
    ) -> Self {
        Self {
            host,
            runner,
            events,
            config,
        }
    }

    fn error(&self, error: String) {
        warn!(%error, "resource sweep failed");
        self.events.emit(AutomationEvent::Error {
            kind: ErrorKind::ResourceSweep,
            service: None,
            error,
            decision: None,
            playbook: None,
        });
    }

    /// One sweep. Disk over threshold runs the cleanup script; memory
    /// over threshold asks a human to investigate.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.host.disk_usage_percent().await {
            Ok(disk) => {
                report.disk_usage = Some(disk);
                if disk > self.config.disk_threshold {
                    report.cleanup = self.clean_disk(disk).await;
                }
            }
            Err(e) => self.error(e.to_string()),
        }

        match self.host.memory_usage_percent().await {
            Ok(memory) => {
                report.memory_usage = Some(memory);
                if memory > self.config.memory_threshold {
                    warn!(memory, threshold = self.config.memory_threshold, "high memory usage");
                    report.memory_alert = true;
                    self.events.emit(AutomationEvent::HealthIssue {
                        service: HOST.to_string(),
                        action: "investigate".to_string(),
                        detail: format!(
                            "memory usage {memory:.1}% above {}%",
                            self.config.memory_threshold
                        ),
                        verdict: None,
                    });
                }
            }
            Err(e) => self.error(e.to_string()),
        }

        debug!(disk = ?report.disk_usage, memory = ?report.memory_usage, "resource sweep finished");
        report
    }

    async fn clean_disk(&self, disk: f64) -> Option<ActionOutcome> {
        let threshold = self.config.disk_threshold;
        let Some(script) = &self.config.cleanup_script else {
            warn!(disk, threshold, "high disk usage and no cleanup script configured");
            self.events.emit(AutomationEvent::HealthIssue {
                service: HOST.to_string(),
                action: "cleanup_required".to_string(),
                detail: format!("disk usage {disk:.1}% above {threshold}%"),
                verdict: None,
            });
            return None;
        };

        info!(disk, threshold, %script, "high disk usage, running cleanup");
        let outcome = self
            .runner
            .run_script(script)
            .await
            .unwrap_or_else(|e| ActionOutcome::failed(e.to_string()));
        if !outcome.success {
            self.error(format!("disk cleanup failed: {}", outcome.output));
        }
        Some(outcome)
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.interval;
        info!(interval_secs = interval.as_secs(), "resource sweep started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    info!("resource sweep shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_platform::SimulatedPlatform;

    fn sweep(sim: &SimulatedPlatform, script: Option<&str>) -> (ResourceSweep, EventBus) {
        let events = EventBus::new();
        let config = ResourceSweepConfig {
            cleanup_script: script.map(str::to_string),
            ..Default::default()
        };
        (
            ResourceSweep::new(Arc::new(sim.clone()), Arc::new(sim.clone()), events.clone(), config),
            events,
        )
    }

    #[tokio::test]
    async fn quiet_host_does_nothing() {
        let sim = SimulatedPlatform::new();
        sim.set_host_usage(40.0, 50.0).await;
        let (sweep, _) = sweep(&sim, Some("cleanup.sh"));

        let report = sweep.sweep().await;
        assert!(report.cleanup.is_none());
        assert!(!report.memory_alert);
        assert!(sim.calls_to("run_script").await.is_empty());
    }

    #[tokio::test]
    async fn full_disk_runs_cleanup_script() {
        let sim = SimulatedPlatform::new();
        sim.set_host_usage(92.0, 50.0).await;
        let (sweep, _) = sweep(&sim, Some("cleanup.sh"));

        let report = sweep.sweep().await;
        assert!(report.cleanup.unwrap().success);
        assert_eq!(sim.calls_to("run_script").await, vec!["run_script cleanup.sh"]);
    }

    #[tokio::test]
    async fn high_memory_asks_for_investigation() {
        let sim = SimulatedPlatform::new();
        sim.set_host_usage(10.0, 95.0).await;
        let (sweep, events) = sweep(&sim, None);
        let mut rx = events.subscribe();

        assert!(sweep.sweep().await.memory_alert);
        match rx.recv().await.unwrap() {
            AutomationEvent::HealthIssue { action, .. } => assert_eq!(action, "investigate"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_cleanup_is_reported() {
        let sim = SimulatedPlatform::new();
        sim.set_host_usage(99.0, 10.0).await;
        sim.fail_operation("run_script").await;
        let (sweep, events) = sweep(&sim, Some("cleanup.sh"));
        let mut rx = events.subscribe();

        assert!(!sweep.sweep().await.cleanup.unwrap().success);
        assert_eq!(rx.recv().await.unwrap().name(), "automation:error");
    }
}
