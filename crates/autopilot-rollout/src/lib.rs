//! autopilot-rollout — deployment state machines with rollback.
//!
//! Every deployment starts in `preparing` and ends in one of `completed`,
//! `failed`, `rolled-back`, or `rollback-failed`. The task driving a
//! deployment owns its record for the whole run; the registry only holds
//! snapshots plus the stop handle.
//!
//! # Components
//!
//! - **`strategy`** — blue-green (`deploy-green → health-check →
//!   switch-traffic → monitoring → cleanup`) and canary (one stage per
//!   traffic percentage).
//! - **`monitor`** — the shared post-stage monitoring loop.
//! - **`orchestrator`** — lifecycle, checkpointing, and the rollback path.
//! - **`registry`** — deployment snapshots by id, one active run per service.

pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod registry;
pub mod strategy;

pub use error::{RolloutError, RolloutResult};
pub use monitor::{MonitorOutcome, MonitorSample, monitor_deployment};
pub use orchestrator::{DeploymentOrchestrator, PreparedDeployment};
pub use registry::DeploymentRegistry;
