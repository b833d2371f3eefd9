//! Collaborator selection for the configured platform mode.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use autopilot_core::config::{PlatformConfig, PlatformMode};
use autopilot_core::*;
use autopilot_platform::{CommandPlatform, PushedMetrics, SimulatedPlatform, SysinfoHostUsage};

/// The trait objects every engine is built on.
#[derive(Clone)]
pub struct Collaborators {
    pub platform: Arc<dyn PlatformController>,
    pub metrics: Arc<dyn MetricsSource>,
    pub runner: Arc<dyn ActionRunner>,
    pub resources: Arc<dyn ResourceProvider>,
    pub host: Arc<dyn HostUsage>,
    /// Set when metrics arrive through the operator API.
    pub pushed: Option<PushedMetrics>,
}

impl Collaborators {
    /// Pick collaborators for `config`. `dry_run` forces the simulation.
    pub fn from_config(config: &PlatformConfig, probe_timeout: Duration, dry_run: bool) -> Self {
        if dry_run || config.mode == PlatformMode::Simulated {
            info!(dry_run, "using simulated platform; metrics are pushed through the api");
            let pushed = PushedMetrics::new();
            let mut collab = Self::simulated(&SimulatedPlatform::new());
            collab.metrics = Arc::new(pushed.clone());
            collab.pushed = Some(pushed);
            return collab;
        }

        let commands = Arc::new(CommandPlatform::new(config.commands.clone(), probe_timeout));
        let pushed = config
            .commands
            .get_metrics
            .is_none()
            .then(PushedMetrics::new);
        let metrics: Arc<dyn MetricsSource> = match &pushed {
            Some(p) => Arc::new(p.clone()),
            None => commands.clone(),
        };
        info!(
            shell = %config.commands.shell,
            pushed_metrics = pushed.is_some(),
            "using command platform"
        );
        Self {
            platform: commands.clone(),
            metrics,
            runner: commands.clone(),
            resources: commands,
            host: Arc::new(SysinfoHostUsage::new()),
            pushed,
        }
    }

    /// Everything backed by one simulated platform, metrics included.
    pub fn simulated(sim: &SimulatedPlatform) -> Self {
        Self {
            platform: Arc::new(sim.clone()),
            metrics: Arc::new(sim.clone()),
            runner: Arc::new(sim.clone()),
            resources: Arc::new(sim.clone()),
            host: Arc::new(sim.clone()),
            pushed: None,
        }
    }
}
