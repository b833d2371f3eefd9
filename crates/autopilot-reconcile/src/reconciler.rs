use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use autopilot_core::*;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to read current infrastructure: {0}")]
    Observe(#[source] PlatformError),
}

/// Outcome of one attempted change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeResult {
    #[serde(flatten)]
    pub change: InfrastructureChange,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplySummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Changes never attempted because a critical change failed first.
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyReport {
    pub results: Vec<ChangeResult>,
    pub summary: ApplySummary,
    /// A critical change failed and the rest of the plan was abandoned.
    pub aborted: bool,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        !self.aborted && self.summary.failed == 0
    }
}

/// Changes that turn `current` into `desired`.
pub fn diff(desired: &DesiredState, current: &BTreeMap<String, Value>) -> Vec<InfrastructureChange> {
    let mut changes = Vec::new();

    for (id, spec) in &desired.resources {
        match current.get(id) {
            None => changes.push(InfrastructureChange {
                action: ChangeAction::Create,
                resource: id.clone(),
                description: format!("Create {id}"),
                current: None,
                desired: Some(spec.config.clone()),
                critical: spec.critical,
            }),
            Some(observed) if *observed != spec.config => changes.push(InfrastructureChange {
                action: ChangeAction::Update,
                resource: id.clone(),
                description: format!("Update {id} configuration"),
                current: Some(observed.clone()),
                desired: Some(spec.config.clone()),
                critical: spec.critical,
            }),
            Some(_) => {}
        }
    }

    for (id, observed) in current {
        if !desired.resources.contains_key(id) {
            changes.push(InfrastructureChange {
                action: ChangeAction::Delete,
                resource: id.clone(),
                description: format!("Delete {id}"),
                current: Some(observed.clone()),
                desired: None,
                critical: false,
            });
        }
    }

    changes
}

pub struct InfrastructureReconciler {
    provider: Arc<dyn ResourceProvider>,
}

impl InfrastructureReconciler {
    pub fn new(provider: Arc<dyn ResourceProvider>) -> Self {
        Self { provider }
    }

    /// Diff `desired` against what the provider reports right now.
    pub async fn plan(&self, desired: &DesiredState) -> Result<Vec<InfrastructureChange>, ReconcileError> {
        let current = self
            .provider
            .current_resources()
            .await
            .map_err(ReconcileError::Observe)?;
        let changes = diff(desired, &current);
        debug!(changes = changes.len(), "infrastructure plan computed");
        Ok(changes)
    }

    /// Apply `changes` in order, halting on the first critical failure.
    pub async fn apply(&self, changes: &[InfrastructureChange]) -> ApplyReport {
        let mut results = Vec::with_capacity(changes.len());
        let mut aborted = false;

        for change in changes {
            info!(
                action = ?change.action,
                resource = %change.resource,
                critical = change.critical,
                "applying infrastructure change"
            );
            match self.provider.apply_change(change).await {
                Ok(()) => results.push(ChangeResult {
                    change: change.clone(),
                    success: true,
                    error: None,
                }),
                Err(e) => {
                    results.push(ChangeResult {
                        change: change.clone(),
                        success: false,
                        error: Some(e.to_string()),
                    });
                    if change.critical {
                        error!(resource = %change.resource, error = %e, "critical change failed; aborting apply");
                        aborted = true;
                        break;
                    }
                    warn!(resource = %change.resource, error = %e, "change failed");
                }
            }
        }

        let successful = results.iter().filter(|r| r.success).count();
        let summary = ApplySummary {
            total: changes.len(),
            successful,
            failed: results.len() - successful,
            skipped: changes.len() - results.len(),
        };
        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            skipped = summary.skipped,
            aborted,
            "infrastructure apply finished"
        );
        ApplyReport {
            results,
            summary,
            aborted,
        }
    }

    /// Plan and apply in one step.
    pub async fn reconcile(&self, desired: &DesiredState) -> Result<ApplyReport, ReconcileError> {
        let changes = self.plan(desired).await?;
        if changes.is_empty() {
            info!("no infrastructure changes required");
        }
        Ok(self.apply(&changes).await)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use autopilot_platform::SimulatedPlatform;

    fn desired(entries: &[(&str, Value, bool)]) -> DesiredState {
        DesiredState {
            resources: entries
                .iter()
                .map(|(id, config, critical)| {
                    (
                        id.to_string(),
                        ResourceSpec {
                            critical: *critical,
                            config: config.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn diff_orders_creates_and_updates_before_deletes() {
        let want = desired(&[
            ("db", json!({"size": "large"}), true),
            ("cache", json!({"nodes": 3}), false),
        ]);
        let current = BTreeMap::from([
            ("db".to_string(), json!({"size": "small"})),
            ("legacy".to_string(), json!({})),
        ]);

        let changes = diff(&want, &current);
        let summary: Vec<_> = changes
            .iter()
            .map(|c| (c.action, c.resource.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (ChangeAction::Create, "cache"),
                (ChangeAction::Update, "db"),
                (ChangeAction::Delete, "legacy"),
            ]
        );
        assert!(changes[1].critical);
        assert_eq!(changes[1].current, Some(json!({"size": "small"})));
        assert!(!changes[2].critical);
    }

    #[test]
    fn equal_state_plans_nothing() {
        let want = desired(&[("db", json!({"a": 1, "b": 2}), false)]);
        let current = BTreeMap::from([("db".to_string(), json!({"b": 2, "a": 1}))]);
        assert!(diff(&want, &current).is_empty());
    }

    #[tokio::test]
    async fn applying_a_plan_converges() {
        let sim = SimulatedPlatform::new();
        sim.set_resource("db", json!({"size": "small"})).await;
        sim.set_resource("legacy", json!({})).await;
        let reconciler = InfrastructureReconciler::new(Arc::new(sim.clone()));
        let want = desired(&[
            ("db", json!({"size": "large"}), false),
            ("queue", json!({"shards": 2}), false),
        ]);

        let plan = reconciler.plan(&want).await.unwrap();
        assert_eq!(plan.len(), 3);
        let report = reconciler.apply(&plan).await;
        assert!(report.is_clean());
        assert_eq!(report.summary.successful, 3);

        assert!(reconciler.plan(&want).await.unwrap().is_empty());
        assert_eq!(
            sim.resources().await,
            BTreeMap::from([
                ("db".to_string(), json!({"size": "large"})),
                ("queue".to_string(), json!({"shards": 2})),
            ])
        );
    }

    #[tokio::test]
    async fn critical_failure_skips_the_rest() {
        let sim = SimulatedPlatform::new();
        sim.set_resource("old", json!({})).await;
        sim.fail_resource("b").await;
        let reconciler = InfrastructureReconciler::new(Arc::new(sim.clone()));
        let want = desired(&[
            ("a", json!(1), false),
            ("b", json!(2), true),
            ("c", json!(3), false),
        ]);

        let report = reconciler.reconcile(&want).await.unwrap();

        assert!(report.aborted);
        assert_eq!(report.results.len(), 2);
        assert!(!report.results[1].success);
        assert_eq!(
            report.summary,
            ApplySummary {
                total: 4,
                successful: 1,
                failed: 1,
                skipped: 2,
            }
        );
        // Neither `c` nor the delete of `old` was attempted.
        assert_eq!(sim.calls_to("apply_change").await.len(), 2);
        assert!(sim.resources().await.contains_key("old"));
    }

    #[tokio::test]
    async fn non_critical_failure_continues() {
        let sim = SimulatedPlatform::new();
        sim.fail_resource("a").await;
        let reconciler = InfrastructureReconciler::new(Arc::new(sim.clone()));
        let want = desired(&[("a", json!(1), false), ("b", json!(2), false)]);

        let report = reconciler.reconcile(&want).await.unwrap();

        assert!(!report.aborted);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.successful, 1);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn unreadable_state_is_an_error() {
        let sim = SimulatedPlatform::new();
        sim.fail_operation("current_resources").await;
        let reconciler = InfrastructureReconciler::new(Arc::new(sim));
        assert!(matches!(
            reconciler.plan(&DesiredState::default()).await,
            Err(ReconcileError::Observe(_))
        ));
    }
}
