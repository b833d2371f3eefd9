//! autopilot-health — health verdicts, self-healing, and host sweeps.
//!
//! # Components
//!
//! - **`checker`** — probes a service's endpoints through the platform and
//!   folds the results into a `HealthVerdict` (healthy iff every endpoint
//!   answered 2xx within the timeout).
//! - **`monitor`** — one background task per service re-running the
//!   checker on a fixed interval and keeping the latest verdict.
//! - **`registry`** — ordered playbooks per service, first match wins.
//! - **`healer`** — turns unhealthy verdicts into symptoms, runs the
//!   matching playbook step by step, and re-checks health afterwards.
//! - **`sweep`** — periodic host disk/memory check.

pub mod checker;
pub mod healer;
pub mod monitor;
pub mod registry;
pub mod sweep;

pub use checker::{HealthChecker, probe_endpoint};
pub use healer::{AutoHealer, HealOutcome, RemediationReport};
pub use monitor::HealthMonitor;
pub use registry::RemediationRegistry;
pub use sweep::{ResourceSweep, SweepReport};
