//! autopilot-reconcile — converge observed resources onto a desired state.
//!
//! `plan` diffs desired against observed, key by key: creates and updates
//! in resource-id order, then deletes. `apply` runs a plan in order and
//! stops at the first failed critical change; whatever was not attempted
//! is counted as skipped.

pub mod reconciler;

pub use reconciler::{
    ApplyReport, ApplySummary, ChangeResult, InfrastructureReconciler, ReconcileError, diff,
};
