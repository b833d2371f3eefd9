//! Automation event bus.
//!
//! Every engine publishes what it did (or failed to do) as an
//! `AutomationEvent`. External alerting and incident tooling subscribe to
//! the bus; nobody is required to listen.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::chaos::ChaosResult;
use crate::deployment::Deployment;
use crate::types::{ActionRecord, HealthVerdict, ScaleDecision};

/// Channel capacity for the event stream.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Which loop an `automation:error` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    AutoScaling,
    Scaling,
    HealthCheck,
    Remediation,
    ResourceSweep,
}

/// Events emitted for external alerting and incident systems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum AutomationEvent {
    #[serde(rename = "automation:scaled")]
    Scaled {
        service: String,
        decision: ScaleDecision,
    },

    #[serde(rename = "automation:error")]
    Error {
        kind: ErrorKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service: Option<String>,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        decision: Option<ScaleDecision>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        playbook: Option<String>,
    },

    /// A problem with no automated path. `action` says what a human should do.
    #[serde(rename = "automation:health-issue")]
    HealthIssue {
        service: String,
        action: String,
        detail: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        verdict: Option<HealthVerdict>,
    },

    #[serde(rename = "automation:remediation")]
    Remediation {
        service: String,
        playbook: String,
        results: Vec<ActionRecord>,
        success: bool,
        /// Set when a critical step halted the playbook.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        escalation: Option<String>,
    },

    #[serde(rename = "deployment:completed")]
    DeploymentCompleted { deployment: Deployment },

    #[serde(rename = "deployment:rolled-back")]
    DeploymentRolledBack { deployment: Deployment },

    /// Terminal `failed` or `rollback-failed`; needs a human.
    #[serde(rename = "deployment:failed")]
    DeploymentFailed { deployment: Deployment },

    #[serde(rename = "chaos:experiment-completed")]
    ChaosCompleted { result: ChaosResult },
}

impl AutomationEvent {
    /// The wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scaled { .. } => "automation:scaled",
            Self::Error { .. } => "automation:error",
            Self::HealthIssue { .. } => "automation:health-issue",
            Self::Remediation { .. } => "automation:remediation",
            Self::DeploymentCompleted { .. } => "deployment:completed",
            Self::DeploymentRolledBack { .. } => "deployment:rolled-back",
            Self::DeploymentFailed { .. } => "deployment:failed",
            Self::ChaosCompleted { .. } => "chaos:experiment-completed",
        }
    }

    /// The service (or entity) the event is about.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::Scaled { service, .. }
            | Self::HealthIssue { service, .. }
            | Self::Remediation { service, .. } => Some(service),
            Self::Error { service, .. } => service.as_deref(),
            Self::DeploymentCompleted { deployment }
            | Self::DeploymentRolledBack { deployment }
            | Self::DeploymentFailed { deployment } => Some(&deployment.id),
            Self::ChaosCompleted { result } => Some(&result.run_id),
        }
    }
}

/// Cloneable handle to the broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AutomationEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AutomationEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is fine.
    pub fn emit(&self, event: AutomationEvent) {
        trace!(event = event.name(), "emitting automation event");
        let _ = self.tx.send(event);
    }
}
