//! autopilot-chaos — hypothesis-driven fault experiments.
//!
//! A run walks four phases and records an observation for each:
//!
//! ```text
//! steady-state  → abort (nothing injected) unless the baseline holds
//! inject        → PlatformController::inject_fault
//! monitor       → sample metrics every `sample_interval` for `duration`
//! conclude      → avg error rate and max response time vs. hypothesis
//! ```
//!
//! Once injection has been attempted the fault is reverted exactly once,
//! whatever the later phases did. Finished runs are persisted and
//! published as `chaos:experiment-completed`.

pub mod runner;

pub use runner::{ChaosError, ChaosRunner, evaluate_hypothesis};
