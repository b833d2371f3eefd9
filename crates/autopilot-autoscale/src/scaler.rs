//! AutoScaler — threshold-driven instance scaling.
//!
//! Evaluates each service with a scaling policy against its latest
//! metrics, acts on non-`none` decisions through the platform, and keeps
//! per-service `ScalingState` for cooldown tracking. Acted-on decisions
//! are persisted to the scaling history and published on the event bus.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use autopilot_core::*;
use autopilot_state::{ScalingEvent, StateStore};

#[derive(Debug, Error)]
pub enum AutoscaleError {
    #[error("no scaling policy for service: {0}")]
    NoPolicy(String),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Compute a scaling decision. Pure; the caller supplies the clock.
///
/// Acted-on targets are always within `[policy.min, policy.max]`.
pub fn decide(
    policy: &ScalingPolicy,
    metrics: &ServiceMetrics,
    current: u32,
    last: Option<&ScalingState>,
    now_ms: u64,
) -> ScaleDecision {
    if let Some(last) = last {
        let elapsed = Duration::from_millis(now_ms.saturating_sub(last.timestamp_ms));
        if elapsed < policy.cooldown {
            let remaining = policy.cooldown - elapsed;
            return ScaleDecision::none(
                current,
                format!("in cooldown for another {}", format_duration_rounded(remaining)),
            );
        }
    }

    let up = policy.scale_up_threshold;
    let down = policy.scale_down_threshold;

    if (metrics.cpu >= up || metrics.memory >= up) && current < policy.max {
        let growth = current.div_ceil(2).max(1);
        let to = current
            .saturating_add(growth)
            .min(policy.max)
            .max(policy.min);
        let trigger = if metrics.cpu >= up {
            format!("cpu {:.1}% >= {up}%", metrics.cpu)
        } else {
            format!("memory {:.1}% >= {up}%", metrics.memory)
        };
        return ScaleDecision {
            action: ScaleAction::ScaleUp,
            from: current,
            to,
            reason: trigger,
        };
    }

    if metrics.cpu < down && metrics.memory < down && current > policy.min {
        let to = (current - 1).max(policy.min).min(policy.max);
        return ScaleDecision {
            action: ScaleAction::ScaleDown,
            from: current,
            to,
            reason: format!(
                "cpu {:.1}% and memory {:.1}% below {down}%",
                metrics.cpu, metrics.memory
            ),
        };
    }

    ScaleDecision::none(current, "within thresholds")
}

/// Seconds granularity is enough for log lines.
fn format_duration_rounded(d: Duration) -> String {
    format_duration(Duration::from_secs(d.as_secs().max(1)))
}

/// Periodic autoscaler over every service that has a policy.
pub struct AutoScaler {
    metrics: Arc<dyn MetricsSource>,
    platform: Arc<dyn PlatformController>,
    store: StateStore,
    events: EventBus,
    policies: BTreeMap<String, ScalingPolicy>,
    /// Owned exclusively by the autoscaler; written only after a
    /// successful `set_instance_count`.
    states: RwLock<HashMap<String, ScalingState>>,
}

impl AutoScaler {
    /// Create an autoscaler, restoring cooldown state from the store.
    pub fn new(
        metrics: Arc<dyn MetricsSource>,
        platform: Arc<dyn PlatformController>,
        store: StateStore,
        events: EventBus,
        policies: BTreeMap<String, ScalingPolicy>,
    ) -> Self {
        let restored = match store.list_scaling_states() {
            Ok(states) => states
                .into_iter()
                .filter(|s| policies.contains_key(&s.service))
                .map(|s| (s.service.clone(), s))
                .collect(),
            Err(e) => {
                warn!(error = %e, "could not restore scaling state; starting cold");
                HashMap::new()
            }
        };
        Self {
            metrics,
            platform,
            store,
            events,
            policies,
            states: RwLock::new(restored),
        }
    }

    pub fn policies(&self) -> &BTreeMap<String, ScalingPolicy> {
        &self.policies
    }

    pub async fn scaling_state(&self, service: &str) -> Option<ScalingState> {
        self.states.read().await.get(service).cloned()
    }

    /// Evaluate one service now without acting on the decision.
    pub async fn evaluate(&self, service: &str) -> Result<ScaleDecision, AutoscaleError> {
        self.evaluate_at(service, epoch_millis()).await
    }

    pub async fn evaluate_at(
        &self,
        service: &str,
        now_ms: u64,
    ) -> Result<ScaleDecision, AutoscaleError> {
        let policy = self
            .policies
            .get(service)
            .ok_or_else(|| AutoscaleError::NoPolicy(service.to_string()))?;
        let metrics = self.metrics.get_metrics(service).await?;
        let current = self.platform.get_instance_count(service).await?;
        let states = self.states.read().await;
        Ok(decide(policy, &metrics, current, states.get(service), now_ms))
    }

    /// Ask the platform for the decided count and start the cooldown.
    pub async fn apply(
        &self,
        service: &str,
        decision: &ScaleDecision,
        now_ms: u64,
    ) -> Result<(), AutoscaleError> {
        if decision.is_none() {
            return Ok(());
        }
        self.platform
            .set_instance_count(service, decision.to)
            .await?;

        let state = ScalingState {
            service: service.to_string(),
            last_action: decision.action,
            instances: decision.to,
            timestamp_ms: now_ms,
        };
        self.states
            .write()
            .await
            .insert(service.to_string(), state.clone());

        if let Err(e) = self.store.put_scaling_state(&state) {
            warn!(%service, error = %e, "failed to persist scaling state");
        }
        let event = ScalingEvent {
            service: service.to_string(),
            decision: decision.clone(),
            timestamp_ms: now_ms,
        };
        if let Err(e) = self.store.record_scaling_event(&event) {
            warn!(%service, error = %e, "failed to record scaling history");
        }

        info!(
            %service,
            action = ?decision.action,
            from = decision.from,
            to = decision.to,
            reason = %decision.reason,
            "scaled service"
        );
        self.events.emit(AutomationEvent::Scaled {
            service: service.to_string(),
            decision: decision.clone(),
        });
        Ok(())
    }

    /// Evaluate and act on one service; failures become error events.
    pub async fn tick_service(&self, service: &str, now_ms: u64) -> Option<ScaleDecision> {
        let decision = match self.evaluate_at(service, now_ms).await {
            Ok(d) => d,
            Err(e) => {
                warn!(%service, error = %e, "autoscale evaluation failed");
                self.events.emit(AutomationEvent::Error {
                    kind: ErrorKind::AutoScaling,
                    service: Some(service.to_string()),
                    error: e.to_string(),
                    decision: None,
                    playbook: None,
                });
                return None;
            }
        };

        if decision.is_none() {
            debug!(%service, reason = %decision.reason, "no scaling needed");
            return Some(decision);
        }

        if let Err(e) = self.apply(service, &decision, now_ms).await {
            warn!(%service, to = decision.to, error = %e, "scaling action failed");
            self.events.emit(AutomationEvent::Error {
                kind: ErrorKind::Scaling,
                service: Some(service.to_string()),
                error: e.to_string(),
                decision: Some(decision.clone()),
                playbook: None,
            });
        }
        Some(decision)
    }

    /// One pass over every service with a policy.
    pub async fn evaluate_all(&self) -> Vec<(String, ScaleDecision)> {
        let now_ms = epoch_millis();
        let mut decisions = Vec::new();
        for service in self.policies.keys() {
            if let Some(decision) = self.tick_service(service, now_ms).await {
                decisions.push((service.clone(), decision));
            }
        }
        decisions
    }

    /// Run the autoscaler loop until shutdown.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            services = self.policies.len(),
            "autoscaler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.evaluate_all().await;
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
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

    const FIVE_MIN_MS: u64 = 300_000;

    fn policy(min: u32, max: u32) -> ScalingPolicy {
        ScalingPolicy {
            min,
            max,
            target_cpu: 70.0,
            target_memory: 80.0,
            scale_up_threshold: 80.0,
            scale_down_threshold: 30.0,
            cooldown: Duration::from_millis(FIVE_MIN_MS),
        }
    }

    fn metrics(cpu: f64, memory: f64) -> ServiceMetrics {
        ServiceMetrics {
            cpu,
            memory,
            ..Default::default()
        }
    }

    fn last_scaled_at(timestamp_ms: u64) -> ScalingState {
        ScalingState {
            service: "api".to_string(),
            last_action: ScaleAction::ScaleUp,
            instances: 3,
            timestamp_ms,
        }
    }

    async fn scaler(sim: &SimulatedPlatform) -> (AutoScaler, StateStore, EventBus) {
        let store = StateStore::open_in_memory().unwrap();
        let events = EventBus::new();
        let mut policies = BTreeMap::new();
        policies.insert("api".to_string(), policy(2, 20));
        let scaler = AutoScaler::new(
            Arc::new(sim.clone()),
            Arc::new(sim.clone()),
            store.clone(),
            events.clone(),
            policies,
        );
        (scaler, store, events)
    }

    #[test]
    fn cpu_over_threshold_scales_up_by_half() {
        let d = decide(&policy(2, 20), &metrics(85.0, 40.0), 2, None, 0);
        assert_eq!(d.action, ScaleAction::ScaleUp);
        assert_eq!((d.from, d.to), (2, 3));

        let d = decide(&policy(2, 20), &metrics(50.0, 95.0), 7, None, 0);
        assert_eq!((d.action, d.to), (ScaleAction::ScaleUp, 11));
    }

    #[test]
    fn scale_up_grows_by_at_least_one() {
        let d = decide(&policy(0, 5), &metrics(90.0, 10.0), 0, None, 0);
        assert_eq!((d.action, d.to), (ScaleAction::ScaleUp, 1));
    }

    #[test]
    fn scale_up_is_capped_at_max() {
        let d = decide(&policy(2, 10), &metrics(99.0, 99.0), 9, None, 0);
        assert_eq!(d.to, 10);

        let d = decide(&policy(2, 10), &metrics(99.0, 99.0), 10, None, 0);
        assert!(d.is_none());
    }

    #[test]
    fn scale_down_needs_both_metrics_low() {
        let d = decide(&policy(2, 20), &metrics(10.0, 10.0), 5, None, 0);
        assert_eq!((d.action, d.to), (ScaleAction::ScaleDown, 4));

        let d = decide(&policy(2, 20), &metrics(10.0, 50.0), 5, None, 0);
        assert!(d.is_none());
    }

    #[test]
    fn scale_down_stops_at_min() {
        let d = decide(&policy(2, 20), &metrics(1.0, 1.0), 2, None, 0);
        assert!(d.is_none());
    }

    #[test]
    fn cooldown_suppresses_any_decision() {
        let last = last_scaled_at(1_000);
        let d = decide(&policy(2, 20), &metrics(99.0, 99.0), 3, Some(&last), 1_000 + FIVE_MIN_MS - 1);
        assert!(d.is_none());
        assert!(d.reason.contains("cooldown"));

        let d = decide(&policy(2, 20), &metrics(99.0, 99.0), 3, Some(&last), 1_000 + FIVE_MIN_MS);
        assert_eq!(d.action, ScaleAction::ScaleUp);
    }

    #[test]
    fn targets_stay_within_bounds() {
        let p = policy(3, 8);
        for current in 0..=12 {
            for (cpu, mem) in [(0.0, 0.0), (50.0, 50.0), (95.0, 10.0), (10.0, 95.0)] {
                let d = decide(&p, &metrics(cpu, mem), current, None, 0);
                if !d.is_none() {
                    assert!(d.to >= p.min && d.to <= p.max, "{current} -> {}", d.to);
                }
            }
        }
    }

    #[tokio::test]
    async fn successful_scale_records_state_and_history() {
        let sim = SimulatedPlatform::new();
        sim.set_metrics("api", metrics(85.0, 40.0)).await;
        sim.set_instances("api", 2).await;
        let (scaler, store, events) = scaler(&sim).await;
        let mut rx = events.subscribe();

        let d = scaler.tick_service("api", 10_000).await.unwrap();
        assert_eq!((d.from, d.to), (2, 3));
        assert_eq!(sim.instances("api").await, Some(3));

        let state = scaler.scaling_state("api").await.unwrap();
        assert_eq!((state.instances, state.timestamp_ms), (3, 10_000));
        assert_eq!(store.get_scaling_state("api").unwrap(), Some(state));
        assert_eq!(store.list_scaling_events("api", 10).unwrap().len(), 1);
        assert_eq!(rx.recv().await.unwrap().name(), "automation:scaled");

        // Inside the cooldown nothing further happens.
        let d = scaler.tick_service("api", 20_000).await.unwrap();
        assert!(d.is_none());
        assert_eq!(sim.instances("api").await, Some(3));
    }

    #[tokio::test]
    async fn platform_failure_does_not_start_cooldown() {
        let sim = SimulatedPlatform::new();
        sim.set_metrics("api", metrics(85.0, 40.0)).await;
        sim.set_instances("api", 2).await;
        sim.fail_operation("set_instance_count").await;
        let (scaler, _store, events) = scaler(&sim).await;
        let mut rx = events.subscribe();

        scaler.tick_service("api", 10_000).await;
        assert!(scaler.scaling_state("api").await.is_none());
        match rx.recv().await.unwrap() {
            AutomationEvent::Error { kind, decision, .. } => {
                assert_eq!(kind, ErrorKind::Scaling);
                assert_eq!(decision.unwrap().to, 3);
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Next tick retries immediately.
        sim.recover_operation("set_instance_count").await;
        let d = scaler.tick_service("api", 11_000).await.unwrap();
        assert_eq!(d.to, 3);
        assert_eq!(sim.instances("api").await, Some(3));
    }

    #[tokio::test]
    async fn missing_metrics_emit_autoscaling_error() {
        let sim = SimulatedPlatform::new();
        sim.set_instances("api", 2).await;
        let (scaler, _store, events) = scaler(&sim).await;
        let mut rx = events.subscribe();

        assert!(scaler.tick_service("api", 0).await.is_none());
        match rx.recv().await.unwrap() {
            AutomationEvent::Error { kind, service, .. } => {
                assert_eq!(kind, ErrorKind::AutoScaling);
                assert_eq!(service.as_deref(), Some("api"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn cooldown_survives_restart_through_store() {
        let sim = SimulatedPlatform::new();
        sim.set_metrics("api", metrics(85.0, 40.0)).await;
        sim.set_instances("api", 3).await;

        let store = StateStore::open_in_memory().unwrap();
        store.put_scaling_state(&last_scaled_at(epoch_millis())).unwrap();

        let mut policies = BTreeMap::new();
        policies.insert("api".to_string(), policy(2, 20));
        let scaler = AutoScaler::new(
            Arc::new(sim.clone()),
            Arc::new(sim.clone()),
            store,
            EventBus::new(),
            policies,
        );
        assert!(scaler.evaluate("api").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_service_has_no_policy() {
        let sim = SimulatedPlatform::new();
        let (scaler, _, _) = scaler(&sim).await;
        assert!(matches!(
            scaler.evaluate("web").await,
            Err(AutoscaleError::NoPolicy(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_ticks_until_shutdown() {
        let sim = SimulatedPlatform::new();
        sim.set_metrics("api", metrics(85.0, 40.0)).await;
        sim.set_instances("api", 2).await;
        let (scaler, _, _) = scaler(&sim).await;
        let scaler = Arc::new(scaler);

        let (tx, rx) = tokio::sync::watch::channel(false);
        let task = {
            let scaler = scaler.clone();
            tokio::spawn(async move { scaler.run(Duration::from_secs(30), rx).await })
        };

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(sim.instances("api").await, Some(3));

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
