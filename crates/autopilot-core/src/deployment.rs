//! Deployment records and the vocabulary of the rollout state machine.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::ServiceMetrics;

/// How a new version reaches production traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStrategy {
    #[default]
    BlueGreen,
    Canary,
    /// Accepted in configuration but refused by the orchestrator.
    Rolling,
}

impl std::fmt::Display for DeploymentStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::BlueGreen => "blue-green",
            Self::Canary => "canary",
            Self::Rolling => "rolling",
        })
    }
}

/// Lifecycle state of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentState {
    Preparing,
    Deploying,
    Completed,
    Failed,
    RollingBack,
    RolledBack,
    /// Needs manual intervention; never retried automatically.
    RollbackFailed,
}

impl DeploymentState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::RolledBack | Self::RollbackFailed
        )
    }
}

/// Target artifact for a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl ArtifactConfig {
    pub fn version(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            params: BTreeMap::new(),
        }
    }
}

/// One step of a progressive rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryStage {
    /// Share of traffic sent to the new version (1–100).
    pub percentage: u32,
    /// How long to monitor before the next stage; zero skips monitoring.
    #[serde(with = "crate::duration::serde_str")]
    pub duration: Duration,
}

/// Outcome of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageResult {
    Running,
    Success,
    Failed,
}

/// Timing and result of one named stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub started_at_ms: u64,
    pub ended_at_ms: Option<u64>,
    pub result: StageResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ServiceMetrics>,
}

/// Why a deployment left the happy path, with the triggering metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub stage: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ServiceMetrics>,
}

/// A deployment run, owned by its driving task for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub service: String,
    pub config: ArtifactConfig,
    pub strategy: DeploymentStrategy,
    pub state: DeploymentState,
    pub stages: Vec<StageRecord>,
    pub started_at_ms: u64,
    pub ended_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
    /// Version redeployed by the rollback path, if it ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_error: Option<String>,
}

impl Deployment {
    pub fn new(
        id: impl Into<String>,
        service: &str,
        config: ArtifactConfig,
        strategy: DeploymentStrategy,
        now_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            service: service.to_string(),
            config,
            strategy,
            state: DeploymentState::Preparing,
            stages: Vec::new(),
            started_at_ms: now_ms,
            ended_at_ms: None,
            failure: None,
            rollback_version: None,
            rollback_error: None,
        }
    }
}

/// Where the platform should route a service's traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrafficTarget {
    /// All traffic to one slot (blue-green switch).
    Slot { slot: String },
    /// Weighted split: `percentage` to `version`, the rest to the live one.
    Canary { version: String, percentage: u32 },
}

/// Handle to an artifact deployed into a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotHandle {
    pub service: String,
    pub slot: String,
    pub version: String,
    /// Health endpoints of the slot itself, if the platform exposes them.
    #[serde(default)]
    pub endpoints: Vec<String>,
}

/// Reference to a previously deployed version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRef {
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(DeploymentState::Completed.is_terminal());
        assert!(DeploymentState::Failed.is_terminal());
        assert!(DeploymentState::RolledBack.is_terminal());
        assert!(DeploymentState::RollbackFailed.is_terminal());
        assert!(!DeploymentState::Preparing.is_terminal());
        assert!(!DeploymentState::Deploying.is_terminal());
        assert!(!DeploymentState::RollingBack.is_terminal());
    }

    #[test]
    fn states_use_kebab_case_on_the_wire() {
        let json = serde_json::to_string(&DeploymentState::RollbackFailed).unwrap();
        assert_eq!(json, "\"rollback-failed\"");
        let s: DeploymentStrategy = serde_json::from_str("\"blue-green\"").unwrap();
        assert_eq!(s, DeploymentStrategy::BlueGreen);
    }

    #[test]
    fn canary_stage_durations_parse_from_strings() {
        let stage: CanaryStage =
            serde_json::from_str(r#"{"percentage":10,"duration":"5m"}"#).unwrap();
        assert_eq!(stage.duration, Duration::from_secs(300));
    }
}
