//! Domain types for scaling, health, and remediation.
//!
//! Deployment, chaos, and infrastructure records live in their own
//! modules. Everything here is serializable so it can travel on the event
//! bus and land in the state store.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Metrics ───────────────────────────────────────────────────────

/// Point-in-time resource and traffic figures for one service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetrics {
    /// CPU utilisation, percent (0–100).
    pub cpu: f64,
    /// Memory utilisation, percent (0–100).
    pub memory: f64,
    /// Failed requests, percent (0–100).
    pub error_rate: f64,
    /// Mean response time in milliseconds.
    pub response_time_ms: f64,
    /// Requests served since the previous snapshot.
    pub request_count: u64,
}

// ── Scaling ───────────────────────────────────────────────────────

/// Operator-supplied autoscaling policy for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub min: u32,
    pub max: u32,
    /// Informational only; decisions use the thresholds.
    #[serde(default)]
    pub target_cpu: f64,
    /// Informational only; decisions use the thresholds.
    #[serde(default)]
    pub target_memory: f64,
    /// CPU or memory at or above this percentage triggers a scale-up.
    pub scale_up_threshold: f64,
    /// CPU and memory both below this percentage trigger a scale-down.
    pub scale_down_threshold: f64,
    /// Minimum time between two scaling actions.
    #[serde(with = "crate::duration::serde_str")]
    pub cooldown: Duration,
}

impl ScalingPolicy {
    /// Check the structural invariants of the policy.
    pub fn validate(&self) -> Result<(), String> {
        if self.min > self.max {
            return Err(format!("min ({}) exceeds max ({})", self.min, self.max));
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(format!(
                "scale_down_threshold ({}) must be below scale_up_threshold ({})",
                self.scale_down_threshold, self.scale_up_threshold
            ));
        }
        Ok(())
    }
}

/// Direction of a scaling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScaleAction {
    None,
    ScaleUp,
    ScaleDown,
}

/// Outcome of evaluating a service against its policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleDecision {
    pub action: ScaleAction,
    pub from: u32,
    pub to: u32,
    pub reason: String,
}

impl ScaleDecision {
    /// A decision that leaves the instance count untouched.
    pub fn none(current: u32, reason: impl Into<String>) -> Self {
        Self {
            action: ScaleAction::None,
            from: current,
            to: current,
            reason: reason.into(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.action == ScaleAction::None
    }
}

/// Last acted-on scaling step for a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingState {
    pub service: String,
    pub last_action: ScaleAction,
    pub instances: u32,
    /// Epoch milliseconds of the successful platform call.
    pub timestamp_ms: u64,
}

// ── Health ────────────────────────────────────────────────────────

/// Raw answer from probing one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointResponse {
    pub status_code: u16,
    pub duration_ms: u64,
}

/// Probe result for one endpoint within a verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointCheck {
    pub endpoint: String,
    /// Absent when the probe never got a response.
    pub status_code: Option<u16>,
    pub duration_ms: u64,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated health of a service for one probe cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthVerdict {
    pub service: String,
    /// AND over every endpoint check.
    pub healthy: bool,
    pub endpoints: Vec<EndpointCheck>,
    pub avg_response_time_ms: f64,
    pub checked_at_ms: u64,
}

impl HealthVerdict {
    /// Aggregate per-endpoint results into a verdict.
    pub fn from_checks(service: &str, endpoints: Vec<EndpointCheck>, checked_at_ms: u64) -> Self {
        let healthy = endpoints.iter().all(|e| e.healthy);
        let avg_response_time_ms = if endpoints.is_empty() {
            0.0
        } else {
            endpoints.iter().map(|e| e.duration_ms as f64).sum::<f64>() / endpoints.len() as f64
        };
        Self {
            service: service.to_string(),
            healthy,
            endpoints,
            avg_response_time_ms,
            checked_at_ms,
        }
    }
}

// ── Remediation ───────────────────────────────────────────────────

/// Symbolic condition a playbook can be triggered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symptom {
    Unhealthy,
    HighResponseTime,
    ConnectionPoolExhausted,
}

/// One remediation step kind. The set is closed; anything else in the
/// config lands on `Unknown` and fails at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemediationAction {
    Restart {
        #[serde(default)]
        params: BTreeMap<String, String>,
    },
    Scale {
        delta: i32,
    },
    ClearCache,
    ResetConnections,
    Failover {
        #[serde(default)]
        params: BTreeMap<String, String>,
    },
    RunScript {
        script: String,
    },
    /// No-op; only the step's `wait_after` applies.
    Wait,
    #[serde(other)]
    Unknown,
}

impl RemediationAction {
    /// Stable name used in records and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Restart { .. } => "restart",
            Self::Scale { .. } => "scale",
            Self::ClearCache => "clear_cache",
            Self::ResetConnections => "reset_connections",
            Self::Failover { .. } => "failover",
            Self::RunScript { .. } => "run_script",
            Self::Wait => "wait",
            Self::Unknown => "unknown",
        }
    }
}

/// A playbook step: the action plus its execution flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookStep {
    pub action: RemediationAction,
    /// Failure of a critical step halts the playbook.
    #[serde(default)]
    pub critical: bool,
    /// Pause before the next step.
    #[serde(default, with = "crate::duration::serde_opt_str")]
    pub wait_after: Option<Duration>,
}

/// A named, ordered remediation sequence gated by trigger symptoms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    pub name: String,
    pub triggers: Vec<Symptom>,
    pub actions: Vec<PlaybookStep>,
}

impl Playbook {
    /// Whether any trigger is among the detected symptoms.
    pub fn matches(&self, symptoms: &[Symptom]) -> bool {
        self.triggers.iter().any(|t| symptoms.contains(t))
    }
}

/// What a collaborator reports after running one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub output: String,
}

impl ActionOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Recorded result of one executed playbook step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: String,
    pub critical: bool,
    pub success: bool,
    pub output: String,
}
