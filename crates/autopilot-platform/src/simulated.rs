//! Simulated platform — deterministic, scriptable, and observable.
//!
//! Metrics and endpoint responses are queues: each call pops the front
//! until one entry remains, which then sticks. Any operation can be made
//! to fail by name (`fail_operation("set_instance_count")`). Every call is
//! appended to a log so tests can assert on exactly what was requested.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use autopilot_core::*;

/// A scripted endpoint answer. `None` models a connection failure.
pub type EndpointScript = Option<EndpointResponse>;

#[derive(Default)]
struct SimState {
    metrics: HashMap<String, VecDeque<ServiceMetrics>>,
    instances: HashMap<String, u32>,
    endpoints: HashMap<String, VecDeque<EndpointScript>>,
    slot_endpoints: HashMap<(String, String), Vec<String>>,
    previous_versions: HashMap<String, String>,
    live_versions: HashMap<String, String>,
    failing: HashSet<String>,
    failing_slots: HashSet<String>,
    traffic: Vec<(String, TrafficTarget)>,
    calls: Vec<String>,
    faults_injected: u32,
    faults_reverted: u32,
    resources: BTreeMap<String, Value>,
    failing_resources: HashSet<String>,
    disk_usage: f64,
    memory_usage: f64,
}

/// In-process platform; cheap to clone, all clones share state.
#[derive(Clone, Default)]
pub struct SimulatedPlatform {
    state: Arc<Mutex<SimState>>,
}

/// Pop the next scripted entry, keeping the last one sticky.
fn next_scripted<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Scripting ──────────────────────────────────────────────────

    /// Fixed metrics for a service.
    pub async fn set_metrics(&self, service: &str, metrics: ServiceMetrics) {
        self.script_metrics(service, vec![metrics]).await;
    }

    /// A sequence of metrics; the last one repeats once reached.
    pub async fn script_metrics(&self, service: &str, sequence: Vec<ServiceMetrics>) {
        let mut state = self.state.lock().await;
        state
            .metrics
            .insert(service.to_string(), sequence.into_iter().collect());
    }

    pub async fn set_instances(&self, service: &str, count: u32) {
        let mut state = self.state.lock().await;
        state.instances.insert(service.to_string(), count);
    }

    /// Fixed response for an endpoint URL.
    pub async fn set_endpoint(&self, url: &str, status_code: u16, duration_ms: u64) {
        self.script_endpoint(
            url,
            vec![Some(EndpointResponse {
                status_code,
                duration_ms,
            })],
        )
        .await;
    }

    /// A sequence of endpoint answers; the last one repeats once reached.
    pub async fn script_endpoint(&self, url: &str, sequence: Vec<EndpointScript>) {
        let mut state = self.state.lock().await;
        state
            .endpoints
            .insert(url.to_string(), sequence.into_iter().collect());
    }

    /// Health endpoints reported for a freshly deployed slot.
    pub async fn set_slot_endpoints(&self, service: &str, slot: &str, endpoints: Vec<String>) {
        let mut state = self.state.lock().await;
        state
            .slot_endpoints
            .insert((service.to_string(), slot.to_string()), endpoints);
    }

    pub async fn set_previous_version(&self, service: &str, version: &str) {
        let mut state = self.state.lock().await;
        state
            .previous_versions
            .insert(service.to_string(), version.to_string());
    }

    /// Make every call of `op` (a trait method name) fail.
    pub async fn fail_operation(&self, op: &str) {
        self.state.lock().await.failing.insert(op.to_string());
    }

    pub async fn recover_operation(&self, op: &str) {
        self.state.lock().await.failing.remove(op);
    }

    /// Make `deploy_to_slot` fail for one slot name only.
    pub async fn fail_slot(&self, slot: &str) {
        self.state.lock().await.failing_slots.insert(slot.to_string());
    }

    pub async fn set_resource(&self, id: &str, config: Value) {
        self.state
            .lock()
            .await
            .resources
            .insert(id.to_string(), config);
    }

    /// Make changes to one resource fail.
    pub async fn fail_resource(&self, id: &str) {
        self.state
            .lock()
            .await
            .failing_resources
            .insert(id.to_string());
    }

    pub async fn set_host_usage(&self, disk: f64, memory: f64) {
        let mut state = self.state.lock().await;
        state.disk_usage = disk;
        state.memory_usage = memory;
    }

    // ── Observation ────────────────────────────────────────────────

    /// Every call made so far, as `"<op> <args…>"`.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    /// Calls whose operation name is `op`.
    pub async fn calls_to(&self, op: &str) -> Vec<String> {
        let prefix = format!("{op} ");
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix) || c.as_str() == op)
            .cloned()
            .collect()
    }

    pub async fn instances(&self, service: &str) -> Option<u32> {
        self.state.lock().await.instances.get(service).copied()
    }

    pub async fn traffic_history(&self, service: &str) -> Vec<TrafficTarget> {
        self.state
            .lock()
            .await
            .traffic
            .iter()
            .filter(|(s, _)| s == service)
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub async fn live_version(&self, service: &str) -> Option<String> {
        self.state.lock().await.live_versions.get(service).cloned()
    }

    /// `(injected, reverted)` fault counts.
    pub async fn fault_counts(&self) -> (u32, u32) {
        let state = self.state.lock().await;
        (state.faults_injected, state.faults_reverted)
    }

    pub async fn resources(&self) -> BTreeMap<String, Value> {
        self.state.lock().await.resources.clone()
    }

    /// Log the call and fail it if `op` was marked failing.
    async fn enter(&self, op: &'static str, args: String) -> PlatformResult<()> {
        let mut state = self.state.lock().await;
        let line = if args.is_empty() {
            op.to_string()
        } else {
            format!("{op} {args}")
        };
        debug!(call = %line, "simulated platform call");
        state.calls.push(line);
        if state.failing.contains(op) {
            return Err(PlatformError::operation(op, "simulated failure"));
        }
        Ok(())
    }

    /// Action-runner flavour: failures come back as an unsuccessful outcome.
    async fn run_action(&self, op: &'static str, args: String, output: String) -> ActionOutcome {
        match self.enter(op, args).await {
            Ok(()) => ActionOutcome::ok(output),
            Err(e) => ActionOutcome::failed(e.to_string()),
        }
    }
}

#[async_trait]
impl MetricsSource for SimulatedPlatform {
    async fn get_metrics(&self, service: &str) -> PlatformResult<ServiceMetrics> {
        self.enter("get_metrics", service.to_string()).await?;
        let mut state = self.state.lock().await;
        state
            .metrics
            .get_mut(service)
            .and_then(next_scripted)
            .ok_or_else(|| PlatformError::MetricsUnavailable(service.to_string()))
    }
}

#[async_trait]
impl PlatformController for SimulatedPlatform {
    async fn get_instance_count(&self, service: &str) -> PlatformResult<u32> {
        self.enter("get_instance_count", service.to_string()).await?;
        let state = self.state.lock().await;
        state
            .instances
            .get(service)
            .copied()
            .ok_or_else(|| PlatformError::UnknownService(service.to_string()))
    }

    async fn set_instance_count(&self, service: &str, count: u32) -> PlatformResult<()> {
        self.enter("set_instance_count", format!("{service} {count}"))
            .await?;
        self.state
            .lock()
            .await
            .instances
            .insert(service.to_string(), count);
        Ok(())
    }

    async fn deploy_to_slot(
        &self,
        service: &str,
        slot: &str,
        config: &ArtifactConfig,
    ) -> PlatformResult<SlotHandle> {
        self.enter("deploy_to_slot", format!("{service} {slot} {}", config.version))
            .await?;
        let mut state = self.state.lock().await;
        if state.failing_slots.contains(slot) {
            return Err(PlatformError::operation(
                "deploy_to_slot",
                format!("simulated failure for slot {slot}"),
            ));
        }
        if slot == "current" {
            state
                .live_versions
                .insert(service.to_string(), config.version.clone());
        }
        let endpoints = state
            .slot_endpoints
            .get(&(service.to_string(), slot.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(SlotHandle {
            service: service.to_string(),
            slot: slot.to_string(),
            version: config.version.clone(),
            endpoints,
        })
    }

    async fn switch_traffic(&self, service: &str, target: &TrafficTarget) -> PlatformResult<()> {
        let args = match target {
            TrafficTarget::Slot { slot } => format!("{service} slot={slot}"),
            TrafficTarget::Canary {
                version,
                percentage,
            } => format!("{service} {version}@{percentage}%"),
        };
        self.enter("switch_traffic", args).await?;
        self.state
            .lock()
            .await
            .traffic
            .push((service.to_string(), target.clone()));
        Ok(())
    }

    async fn check_endpoint(&self, url: &str) -> PlatformResult<EndpointResponse> {
        self.enter("check_endpoint", url.to_string()).await?;
        let mut state = self.state.lock().await;
        match state.endpoints.get_mut(url) {
            Some(queue) => match next_scripted(queue) {
                Some(Some(resp)) => Ok(resp),
                _ => Err(PlatformError::operation("check_endpoint", "connection refused")),
            },
            // Unscripted endpoints answer healthy.
            None => Ok(EndpointResponse {
                status_code: 200,
                duration_ms: 10,
            }),
        }
    }

    async fn cleanup_slot(&self, service: &str, slot: &str) -> PlatformResult<()> {
        self.enter("cleanup_slot", format!("{service} {slot}")).await
    }

    async fn get_previous_version(&self, service: &str) -> PlatformResult<VersionRef> {
        self.enter("get_previous_version", service.to_string())
            .await?;
        let state = self.state.lock().await;
        let version = state
            .previous_versions
            .get(service)
            .cloned()
            .unwrap_or_else(|| "v1.0.0".to_string());
        Ok(VersionRef { version })
    }

    async fn inject_fault(&self, service: &str, fault: &FaultSpec) -> PlatformResult<()> {
        // Counted before the failure check: an attempted injection must be reverted.
        self.state.lock().await.faults_injected += 1;
        self.enter("inject_fault", format!("{service} {:?}", fault.kind))
            .await
    }

    async fn revert_fault(&self, service: &str, fault: &FaultSpec) -> PlatformResult<()> {
        self.state.lock().await.faults_reverted += 1;
        self.enter("revert_fault", format!("{service} {:?}", fault.kind))
            .await
    }
}

#[async_trait]
impl ActionRunner for SimulatedPlatform {
    async fn restart(
        &self,
        service: &str,
        _params: &BTreeMap<String, String>,
    ) -> PlatformResult<ActionOutcome> {
        Ok(self
            .run_action("restart", service.to_string(), format!("Service {service} restarted"))
            .await)
    }

    async fn scale(&self, service: &str, delta: i32) -> PlatformResult<ActionOutcome> {
        let outcome = self
            .run_action("scale", format!("{service} {delta:+}"), String::new())
            .await;
        if !outcome.success {
            return Ok(outcome);
        }
        let mut state = self.state.lock().await;
        let current = state.instances.get(service).copied().unwrap_or(0);
        let next = current.saturating_add_signed(delta);
        state.instances.insert(service.to_string(), next);
        Ok(ActionOutcome::ok(format!("Scaled {service} from {current} to {next}")))
    }

    async fn clear_cache(&self, service: &str) -> PlatformResult<ActionOutcome> {
        Ok(self
            .run_action("clear_cache", service.to_string(), "Cache cleared".to_string())
            .await)
    }

    async fn reset_connections(&self, service: &str) -> PlatformResult<ActionOutcome> {
        Ok(self
            .run_action(
                "reset_connections",
                service.to_string(),
                "Connections reset".to_string(),
            )
            .await)
    }

    async fn failover(
        &self,
        service: &str,
        _params: &BTreeMap<String, String>,
    ) -> PlatformResult<ActionOutcome> {
        Ok(self
            .run_action("failover", service.to_string(), "Failover completed".to_string())
            .await)
    }

    async fn run_script(&self, script: &str) -> PlatformResult<ActionOutcome> {
        Ok(self
            .run_action("run_script", script.to_string(), format!("ran {script}"))
            .await)
    }
}

#[async_trait]
impl ResourceProvider for SimulatedPlatform {
    async fn current_resources(&self) -> PlatformResult<BTreeMap<String, Value>> {
        self.enter("current_resources", String::new()).await?;
        Ok(self.state.lock().await.resources.clone())
    }

    async fn apply_change(&self, change: &InfrastructureChange) -> PlatformResult<()> {
        self.enter(
            "apply_change",
            format!("{:?} {}", change.action, change.resource),
        )
        .await?;
        let mut state = self.state.lock().await;
        if state.failing_resources.contains(&change.resource) {
            return Err(PlatformError::operation(
                "apply_change",
                format!("simulated failure for {}", change.resource),
            ));
        }
        match change.action {
            ChangeAction::Create | ChangeAction::Update => {
                let desired = change.desired.clone().unwrap_or(Value::Null);
                state.resources.insert(change.resource.clone(), desired);
            }
            ChangeAction::Delete => {
                state.resources.remove(&change.resource);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl HostUsage for SimulatedPlatform {
    async fn disk_usage_percent(&self) -> PlatformResult<f64> {
        self.enter("disk_usage_percent", String::new()).await?;
        Ok(self.state.lock().await.disk_usage)
    }

    async fn memory_usage_percent(&self) -> PlatformResult<f64> {
        self.enter("memory_usage_percent", String::new()).await?;
        Ok(self.state.lock().await.memory_usage)
    }
}
