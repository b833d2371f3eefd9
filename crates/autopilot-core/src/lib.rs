//! autopilot-core — shared vocabulary for the operations automation engines.
//!
//! Holds the domain types every engine exchanges (scaling policies, health
//! verdicts, playbooks, deployment records, chaos results, infrastructure
//! changes), the collaborator traits the engines drive (`MetricsSource`,
//! `PlatformController`, `ActionRunner`, `ResourceProvider`, `HostUsage`),
//! the automation event bus, and the `autopilot.toml` configuration parser.

pub mod chaos;
pub mod config;
pub mod deployment;
pub mod duration;
pub mod events;
pub mod infra;
pub mod platform;
pub mod types;

pub use chaos::*;
pub use config::{AutopilotConfig, ConfigError, ServiceConfig};
pub use deployment::*;
pub use duration::{format_duration, parse_duration};
pub use events::{AutomationEvent, ErrorKind, EventBus};
pub use infra::*;
pub use platform::*;
pub use types::*;

/// Milliseconds since the unix epoch, used to timestamp records.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
