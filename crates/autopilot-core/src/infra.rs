//! Desired infrastructure state and the changes that converge to it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One resource as the operator wants it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Failure to create/update this resource aborts the apply.
    #[serde(default)]
    pub critical: bool,
    pub config: Value,
}

/// Declarative target state, keyed by resource id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSpec>,
}

/// What a change does to its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

/// A single planned change. Computed fresh on every plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfrastructureChange {
    pub action: ChangeAction,
    pub resource: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<Value>,
    pub critical: bool,
}
