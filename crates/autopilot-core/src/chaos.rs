//! Chaos experiment definitions and their results.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::ServiceMetrics;

/// Fault kinds the platform knows how to inject and revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultKind {
    NetworkLatency,
    InstanceFailure,
    CpuSpike,
}

/// A fault to inject, with kind-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultSpec {
    #[serde(rename = "type")]
    pub kind: FaultKind,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Baseline the service must show before a fault may be injected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteadyStateCriteria {
    #[serde(default = "default_steady_error_rate")]
    pub max_error_rate: f64,
    #[serde(default = "default_steady_response_time")]
    pub max_response_time_ms: f64,
}

impl Default for SteadyStateCriteria {
    fn default() -> Self {
        Self {
            max_error_rate: default_steady_error_rate(),
            max_response_time_ms: default_steady_response_time(),
        }
    }
}

impl SteadyStateCriteria {
    pub fn is_met(&self, m: &ServiceMetrics) -> bool {
        m.error_rate < self.max_error_rate && m.response_time_ms < self.max_response_time_ms
    }
}

fn default_steady_error_rate() -> f64 {
    1.0
}

fn default_steady_response_time() -> f64 {
    200.0
}

/// Expected behaviour under the fault, as bounds on the impact window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub description: String,
    #[serde(default = "default_max_avg_error_rate")]
    pub max_avg_error_rate: f64,
    #[serde(default = "default_max_response_time")]
    pub max_response_time_ms: f64,
}

fn default_max_avg_error_rate() -> f64 {
    5.0
}

fn default_max_response_time() -> f64 {
    1000.0
}

/// A declarative chaos experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosExperiment {
    pub name: String,
    pub service: String,
    pub hypothesis: Hypothesis,
    #[serde(default)]
    pub steady_state: SteadyStateCriteria,
    pub fault: FaultSpec,
    #[serde(default = "default_chaos_duration", with = "crate::duration::serde_str")]
    pub duration: Duration,
    #[serde(default = "default_sample_interval", with = "crate::duration::serde_str")]
    pub sample_interval: Duration,
}

fn default_chaos_duration() -> Duration {
    Duration::from_secs(300)
}

fn default_sample_interval() -> Duration {
    Duration::from_secs(30)
}

/// Aggregated metrics over the impact window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactSummary {
    pub samples: Vec<ServiceMetrics>,
    pub avg_error_rate: f64,
    pub max_response_time_ms: f64,
}

impl ImpactSummary {
    pub fn from_samples(samples: Vec<ServiceMetrics>) -> Self {
        let avg_error_rate = if samples.is_empty() {
            0.0
        } else {
            samples.iter().map(|m| m.error_rate).sum::<f64>() / samples.len() as f64
        };
        let max_response_time_ms = samples
            .iter()
            .map(|m| m.response_time_ms)
            .fold(0.0, f64::max);
        Self {
            samples,
            avg_error_rate,
            max_response_time_ms,
        }
    }
}

/// One phase record of an experiment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "kebab-case")]
pub enum Observation {
    SteadyState {
        verified: bool,
        metrics: ServiceMetrics,
    },
    ChaosInjected {
        at_ms: u64,
        fault: FaultSpec,
    },
    ImpactMonitoring {
        impact: ImpactSummary,
    },
    FaultReverted {
        at_ms: u64,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Verdict on the hypothesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conclusion {
    pub hypothesis_verified: bool,
    pub findings: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Full record of one experiment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaosResult {
    pub run_id: String,
    pub experiment: String,
    pub service: String,
    pub hypothesis: Hypothesis,
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    pub observations: Vec<Observation>,
    pub conclusion: Conclusion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
