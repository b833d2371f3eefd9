//! Health monitor — background probe task per service.
//!
//! Each monitored service gets its own task that re-runs the checker on
//! a fixed interval and stores the latest verdict. Slow endpoints on one
//! service never delay another service's checks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use autopilot_core::HealthVerdict;

use crate::checker::HealthChecker;

/// Per-service monitor state.
struct MonitorSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Runs health checks for every registered service.
pub struct HealthMonitor {
    checker: Arc<HealthChecker>,
    /// Latest verdict per service.
    verdicts: Arc<RwLock<HashMap<String, HealthVerdict>>>,
    monitors: Arc<RwLock<HashMap<String, MonitorSlot>>>,
}

impl HealthMonitor {
    pub fn new(checker: Arc<HealthChecker>) -> Self {
        Self {
            checker,
            verdicts: Arc::new(RwLock::new(HashMap::new())),
            monitors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn checker(&self) -> &Arc<HealthChecker> {
        &self.checker
    }

    /// Start (or restart) the probe loop for one service.
    pub async fn start_monitor(&self, service: &str, interval: Duration) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let service_owned = service.to_string();
        let checker = self.checker.clone();
        let verdicts = self.verdicts.clone();

        let handle = tokio::spawn(async move {
            run_health_loop(&service_owned, checker, verdicts, interval, shutdown_rx).await;
        });

        let mut monitors = self.monitors.write().await;
        if let Some(old) = monitors.insert(
            service.to_string(),
            MonitorSlot {
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        info!(%service, interval_secs = interval.as_secs(), "health monitor started");
    }

    /// Start a monitor for every service the checker knows.
    pub async fn start_all(&self, interval: Duration) {
        let services: Vec<String> = self.checker.services().map(str::to_string).collect();
        for service in services {
            self.start_monitor(&service, interval).await;
        }
    }

    pub async fn stop_monitor(&self, service: &str) {
        let mut monitors = self.monitors.write().await;
        if let Some(slot) = monitors.remove(service) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            info!(%service, "health monitor stopped");
        }
    }

    /// Stop all monitors (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut monitors = self.monitors.write().await;
        for (service, slot) in monitors.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(%service, "health monitor stopped");
        }
        info!("all health monitors stopped");
    }

    pub async fn active_monitors(&self) -> Vec<String> {
        let mut services: Vec<String> = self.monitors.read().await.keys().cloned().collect();
        services.sort();
        services
    }

    pub async fn is_monitoring(&self, service: &str) -> bool {
        self.monitors.read().await.contains_key(service)
    }

    pub async fn latest(&self, service: &str) -> Option<HealthVerdict> {
        self.verdicts.read().await.get(service).cloned()
    }

    /// Latest verdicts, sorted by service.
    pub async fn latest_all(&self) -> Vec<HealthVerdict> {
        let mut all: Vec<HealthVerdict> = self.verdicts.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.service.cmp(&b.service));
        all
    }

    /// Probe now and store the verdict, outside the regular cadence.
    pub async fn refresh(&self, service: &str) -> HealthVerdict {
        let verdict = self.checker.check(service).await;
        self.verdicts
            .write()
            .await
            .insert(service.to_string(), verdict.clone());
        verdict
    }
}

/// The probe loop for a single service. Checks once immediately.
async fn run_health_loop(
    service: &str,
    checker: Arc<HealthChecker>,
    verdicts: Arc<RwLock<HashMap<String, HealthVerdict>>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(%service, "health loop starting");
    let mut delay = Duration::ZERO;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                let verdict = checker.check(service).await;
                let previous = verdicts
                    .write()
                    .await
                    .insert(service.to_string(), verdict.clone());

                let was_healthy = previous.map(|v| v.healthy);
                match (was_healthy, verdict.healthy) {
                    (Some(true) | None, false) => warn!(
                        %service,
                        avg_response_time_ms = verdict.avg_response_time_ms,
                        "service became unhealthy"
                    ),
                    (Some(false), true) => info!(%service, "service recovered"),
                    _ => {}
                }
                delay = interval;
            }
            _ = shutdown.changed() => {
                debug!(%service, "health loop shutting down");
                break;
            }
        }
    }
}
