//! Post-stage deployment monitoring.
//!
//! Polls health and metrics every `interval` for `duration` and returns
//! early on the first violation: a failed health check, error rate above
//! the limit, or CPU/memory above the limit. A stop signal ends the loop
//! at the next poll boundary with reason `cancelled`.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use autopilot_core::config::MonitorThresholds;
use autopilot_core::{MetricsSource, ServiceMetrics, epoch_millis};
use autopilot_health::HealthChecker;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSample {
    pub at_ms: u64,
    pub healthy: bool,
    pub metrics: Option<ServiceMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorOutcome {
    pub healthy: bool,
    pub reason: Option<String>,
    /// Every sample taken, in order.
    pub samples: Vec<MonitorSample>,
}

impl MonitorOutcome {
    fn unhealthy(reason: impl Into<String>, samples: Vec<MonitorSample>) -> Self {
        Self {
            healthy: false,
            reason: Some(reason.into()),
            samples,
        }
    }

    /// Metrics of the most recent sample that had any.
    pub fn last_metrics(&self) -> Option<ServiceMetrics> {
        self.samples.iter().rev().find_map(|s| s.metrics)
    }
}

/// First threshold the metrics break, if any.
fn violation(metrics: &ServiceMetrics, limits: &MonitorThresholds) -> Option<String> {
    if metrics.error_rate > limits.max_error_rate {
        return Some(format!(
            "high error rate: {:.1}% > {}%",
            metrics.error_rate, limits.max_error_rate
        ));
    }
    if metrics.cpu > limits.max_cpu || metrics.memory > limits.max_memory {
        return Some(format!(
            "high resource usage: cpu {:.1}%, memory {:.1}%",
            metrics.cpu, metrics.memory
        ));
    }
    None
}

pub async fn monitor_deployment(
    checker: &HealthChecker,
    metrics: &dyn MetricsSource,
    service: &str,
    duration: Duration,
    interval: Duration,
    limits: &MonitorThresholds,
    stop: &mut watch::Receiver<bool>,
) -> MonitorOutcome {
    let started = tokio::time::Instant::now();
    let mut samples = Vec::new();

    while started.elapsed() < duration {
        if *stop.borrow() {
            return MonitorOutcome::unhealthy("cancelled", samples);
        }

        let verdict = checker.check(service).await;
        let snapshot = metrics.get_metrics(service).await;
        samples.push(MonitorSample {
            at_ms: epoch_millis(),
            healthy: verdict.healthy,
            metrics: snapshot.as_ref().ok().copied(),
        });

        if !verdict.healthy {
            warn!(%service, "deployment monitoring: health check failed");
            return MonitorOutcome::unhealthy("health check failed", samples);
        }
        match snapshot {
            Ok(m) => {
                if let Some(reason) = violation(&m, limits) {
                    warn!(%service, %reason, "deployment monitoring: threshold violated");
                    return MonitorOutcome::unhealthy(reason, samples);
                }
            }
            Err(e) => {
                warn!(%service, error = %e, "deployment monitoring: metrics unavailable");
                return MonitorOutcome::unhealthy(format!("metrics unavailable: {e}"), samples);
            }
        }
        debug!(%service, samples = samples.len(), "deployment monitoring sample ok");

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            Ok(()) = stop.changed() => {}
        }
    }

    if *stop.borrow() {
        return MonitorOutcome::unhealthy("cancelled", samples);
    }
    MonitorOutcome {
        healthy: true,
        reason: None,
        samples,
    }
}
