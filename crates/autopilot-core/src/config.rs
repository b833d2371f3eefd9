//! autopilot.toml configuration parser.
//!
//! Everything the operator controls is declarative: per-service scaling
//! policies, health endpoints and playbooks, the deployment strategy and
//! canary stages, chaos experiments, desired infrastructure, and how the
//! daemon reaches the platform.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::chaos::ChaosExperiment;
use crate::deployment::{CanaryStage, DeploymentStrategy};
use crate::infra::DesiredState;
use crate::types::{Playbook, ScalingPolicy};

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutopilotConfig {
    #[serde(default)]
    pub autoscale: AutoscaleConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub resource_sweep: Option<ResourceSweepConfig>,
    #[serde(default)]
    pub deployment: DeploymentPolicy,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub chaos: Vec<ChaosExperiment>,
    #[serde(default)]
    pub infrastructure: Option<DesiredState>,
    #[serde(default)]
    pub platform: PlatformConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscaleConfig {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default = "default_30s", with = "crate::duration::serde_str")]
    pub interval: Duration,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_30s(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Probe cadence per service.
    #[serde(default = "default_30s", with = "crate::duration::serde_str")]
    pub interval: Duration,
    /// Per-endpoint probe timeout.
    #[serde(default = "default_5s", with = "crate::duration::serde_str")]
    pub timeout: Duration,
    /// Cadence of the auto-healer.
    #[serde(default = "default_30s", with = "crate::duration::serde_str")]
    pub heal_interval: Duration,
    /// Average response time above which `high_response_time` is raised.
    #[serde(default = "default_5s", with = "crate::duration::serde_str")]
    pub high_response_time: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_30s(),
            timeout: default_5s(),
            heal_interval: default_30s(),
            high_response_time: default_5s(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSweepConfig {
    #[serde(default = "default_60s", with = "crate::duration::serde_str")]
    pub interval: Duration,
    #[serde(default = "default_disk_threshold")]
    pub disk_threshold: f64,
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,
    /// Script run through the action runner when disk is over threshold.
    #[serde(default)]
    pub cleanup_script: Option<String>,
}

impl Default for ResourceSweepConfig {
    fn default() -> Self {
        Self {
            interval: default_60s(),
            disk_threshold: default_disk_threshold(),
            memory_threshold: default_memory_threshold(),
            cleanup_script: None,
        }
    }
}

/// Limits the deployment monitoring loop enforces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorThresholds {
    /// Percent.
    #[serde(default = "default_error_rate_limit")]
    pub max_error_rate: f64,
    #[serde(default = "default_resource_limit")]
    pub max_cpu: f64,
    #[serde(default = "default_resource_limit")]
    pub max_memory: f64,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            max_error_rate: default_error_rate_limit(),
            max_cpu: default_resource_limit(),
            max_memory: default_resource_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentPolicy {
    #[serde(default)]
    pub strategy: DeploymentStrategy,
    #[serde(default = "enabled")]
    pub rollback_on_error: bool,
    /// How long a fresh slot has to report healthy.
    #[serde(default = "default_60s", with = "crate::duration::serde_str")]
    pub health_check_grace_period: Duration,
    #[serde(default = "default_5s", with = "crate::duration::serde_str")]
    pub health_check_poll: Duration,
    /// Blue-green post-switch monitoring window.
    #[serde(default = "default_5m", with = "crate::duration::serde_str")]
    pub monitoring_duration: Duration,
    #[serde(default = "default_30s", with = "crate::duration::serde_str")]
    pub monitoring_interval: Duration,
    #[serde(default = "default_canary_stages")]
    pub canary_stages: Vec<CanaryStage>,
    #[serde(default)]
    pub thresholds: MonitorThresholds,
}

impl Default for DeploymentPolicy {
    fn default() -> Self {
        Self {
            strategy: DeploymentStrategy::default(),
            rollback_on_error: true,
            health_check_grace_period: default_60s(),
            health_check_poll: default_5s(),
            monitoring_duration: default_5m(),
            monitoring_interval: default_30s(),
            canary_stages: default_canary_stages(),
            thresholds: MonitorThresholds::default(),
        }
    }
}

/// One managed service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    /// Health endpoints probed every cycle.
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub scaling: Option<ScalingPolicy>,
    /// Ordered; the first playbook whose triggers match wins.
    #[serde(default)]
    pub playbooks: Vec<Playbook>,
}

/// How the daemon reaches the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformMode {
    /// In-process simulation; nothing outside the daemon is touched.
    #[default]
    Simulated,
    /// Shell command templates per operation.
    Commands,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub mode: PlatformMode,
    #[serde(default)]
    pub commands: CommandTemplates,
}

/// Shell templates, one per collaborator operation.
///
/// Placeholders: `{service}`, `{count}`, `{delta}`, `{slot}`, `{version}`,
/// `{target}`, `{percentage}`, `{fault}`, `{resource}`, `{action}`,
/// `{config}`, plus `{param.NAME}` for action/fault parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTemplates {
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Must print `ServiceMetrics` as JSON.
    pub get_metrics: Option<String>,
    pub get_instance_count: Option<String>,
    pub set_instance_count: Option<String>,
    pub deploy_to_slot: Option<String>,
    pub switch_traffic: Option<String>,
    pub cleanup_slot: Option<String>,
    pub get_previous_version: Option<String>,
    pub inject_fault: Option<String>,
    pub revert_fault: Option<String>,
    pub restart: Option<String>,
    pub scale: Option<String>,
    pub clear_cache: Option<String>,
    pub reset_connections: Option<String>,
    pub failover: Option<String>,
    /// Must print the current resources as a JSON object.
    pub list_resources: Option<String>,
    pub apply_change: Option<String>,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            get_metrics: None,
            get_instance_count: None,
            set_instance_count: None,
            deploy_to_slot: None,
            switch_traffic: None,
            cleanup_slot: None,
            get_previous_version: None,
            inject_fault: None,
            revert_fault: None,
            restart: None,
            scale: None,
            clear_cache: None,
            reset_connections: None,
            failover: None,
            list_resources: None,
            apply_change: None,
        }
    }
}

impl AutopilotConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AutopilotConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Check structural invariants. Ambiguous playbooks only warn.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for svc in &self.services {
            if !names.insert(svc.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate service: {}",
                    svc.name
                )));
            }
            if let Some(policy) = &svc.scaling {
                policy
                    .validate()
                    .map_err(|e| ConfigError::Invalid(format!("service {}: {e}", svc.name)))?;
            }
        }

        let mut last = 0;
        for stage in &self.deployment.canary_stages {
            if stage.percentage == 0 || stage.percentage > 100 {
                return Err(ConfigError::Invalid(format!(
                    "canary percentage out of range: {}",
                    stage.percentage
                )));
            }
            if stage.percentage < last {
                return Err(ConfigError::Invalid(
                    "canary percentages must not decrease".to_string(),
                ));
            }
            last = stage.percentage;
        }
        if self.deployment.strategy == DeploymentStrategy::Canary
            && self.deployment.canary_stages.is_empty()
        {
            return Err(ConfigError::Invalid(
                "canary strategy needs at least one stage".to_string(),
            ));
        }

        let mut experiments = HashSet::new();
        for exp in &self.chaos {
            if !experiments.insert(exp.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate chaos experiment: {}",
                    exp.name
                )));
            }
        }

        for (service, first, shadowed) in self.playbook_overlaps() {
            warn!(
                %service,
                %first,
                %shadowed,
                "playbooks share triggers; the first registered one always wins"
            );
        }

        Ok(())
    }

    /// Pairs of playbooks on one service whose trigger sets intersect,
    /// as `(service, earlier, later)`.
    pub fn playbook_overlaps(&self) -> Vec<(String, String, String)> {
        let mut overlaps = Vec::new();
        for svc in &self.services {
            for (i, a) in svc.playbooks.iter().enumerate() {
                for b in &svc.playbooks[i + 1..] {
                    if a.triggers.iter().any(|t| b.triggers.contains(t)) {
                        overlaps.push((svc.name.clone(), a.name.clone(), b.name.clone()));
                    }
                }
            }
        }
        overlaps
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Scaling policies keyed by service, for services that have one.
    pub fn scaling_policies(&self) -> BTreeMap<String, ScalingPolicy> {
        self.services
            .iter()
            .filter_map(|s| s.scaling.clone().map(|p| (s.name.clone(), p)))
            .collect()
    }

    pub fn experiment(&self, name: &str) -> Option<&ChaosExperiment> {
        self.chaos.iter().find(|e| e.name == name)
    }
}

fn enabled() -> bool {
    true
}

fn default_5s() -> Duration {
    Duration::from_secs(5)
}

fn default_30s() -> Duration {
    Duration::from_secs(30)
}

fn default_60s() -> Duration {
    Duration::from_secs(60)
}

fn default_5m() -> Duration {
    Duration::from_secs(300)
}

fn default_disk_threshold() -> f64 {
    85.0
}

fn default_memory_threshold() -> f64 {
    90.0
}

fn default_error_rate_limit() -> f64 {
    5.0
}

fn default_resource_limit() -> f64 {
    90.0
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_canary_stages() -> Vec<CanaryStage> {
    vec![
        CanaryStage {
            percentage: 10,
            duration: Duration::from_secs(300),
        },
        CanaryStage {
            percentage: 50,
            duration: Duration::from_secs(600),
        },
        CanaryStage {
            percentage: 100,
            duration: Duration::ZERO,
        },
    ]
}
