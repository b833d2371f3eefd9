//! Collaborator interfaces the engines drive.
//!
//! The engines never talk to a metrics backend, compute platform, or
//! script sandbox directly; they go through these traits so they can run
//! against the simulated platform in tests and dry runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::chaos::FaultSpec;
use crate::deployment::{ArtifactConfig, SlotHandle, TrafficTarget, VersionRef};
use crate::infra::InfrastructureChange;
use crate::types::{ActionOutcome, EndpointResponse, ServiceMetrics};

/// Result alias for collaborator calls.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Failures reported by collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("metrics unavailable for service: {0}")]
    MetricsUnavailable(String),

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("{op} failed: {reason}")]
    Operation { op: &'static str, reason: String },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("not supported: {0}")]
    Unsupported(String),
}

impl PlatformError {
    pub fn operation(op: &'static str, reason: impl Into<String>) -> Self {
        Self::Operation {
            op,
            reason: reason.into(),
        }
    }
}

/// Source of per-service metric snapshots.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn get_metrics(&self, service: &str) -> PlatformResult<ServiceMetrics>;
}

/// The compute platform: instance counts, slots, traffic, faults.
#[async_trait]
pub trait PlatformController: Send + Sync {
    async fn get_instance_count(&self, service: &str) -> PlatformResult<u32>;

    async fn set_instance_count(&self, service: &str, count: u32) -> PlatformResult<()>;

    async fn deploy_to_slot(
        &self,
        service: &str,
        slot: &str,
        config: &ArtifactConfig,
    ) -> PlatformResult<SlotHandle>;

    async fn switch_traffic(&self, service: &str, target: &TrafficTarget) -> PlatformResult<()>;

    async fn check_endpoint(&self, url: &str) -> PlatformResult<EndpointResponse>;

    async fn cleanup_slot(&self, service: &str, slot: &str) -> PlatformResult<()>;

    async fn get_previous_version(&self, service: &str) -> PlatformResult<VersionRef>;

    async fn inject_fault(&self, service: &str, fault: &FaultSpec) -> PlatformResult<()>;

    async fn revert_fault(&self, service: &str, fault: &FaultSpec) -> PlatformResult<()>;
}

/// Executes remediation actions.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn restart(
        &self,
        service: &str,
        params: &BTreeMap<String, String>,
    ) -> PlatformResult<ActionOutcome>;

    async fn scale(&self, service: &str, delta: i32) -> PlatformResult<ActionOutcome>;

    async fn clear_cache(&self, service: &str) -> PlatformResult<ActionOutcome>;

    async fn reset_connections(&self, service: &str) -> PlatformResult<ActionOutcome>;

    async fn failover(
        &self,
        service: &str,
        params: &BTreeMap<String, String>,
    ) -> PlatformResult<ActionOutcome>;

    async fn run_script(&self, script: &str) -> PlatformResult<ActionOutcome>;
}

/// Observed infrastructure and the means to change it.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn current_resources(&self) -> PlatformResult<BTreeMap<String, Value>>;

    async fn apply_change(&self, change: &InfrastructureChange) -> PlatformResult<()>;
}

/// Host-level usage figures for the resource sweep.
#[async_trait]
pub trait HostUsage: Send + Sync {
    /// Fullest mounted disk, percent.
    async fn disk_usage_percent(&self) -> PlatformResult<f64>;

    async fn memory_usage_percent(&self) -> PlatformResult<f64>;
}
