//! StateStore — redb-backed persistence for automation records.
//!
//! Provides typed accessors over deployments, scaling state, scaling
//! history, and chaos results. The store supports both on-disk and
//! in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use autopilot_core::{ChaosResult, Deployment, ScaleDecision, ScalingState};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// One acted-on scaling decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub service: String,
    pub decision: ScaleDecision,
    pub timestamp_ms: u64,
}

impl ScalingEvent {
    fn table_key(&self) -> String {
        format!("{}:{:020}", self.service, self.timestamp_ms)
    }
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing and dry runs).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(SCALING_STATE).map_err(map_err!(Table))?;
        txn.open_table(SCALING_HISTORY).map_err(map_err!(Table))?;
        txn.open_table(CHAOS_RESULTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn put<T: Serialize>(&self, table: Table, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// All values whose key starts with `prefix`, in key order.
    fn list<T: DeserializeOwned>(&self, table: Table, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
            }
        }
        Ok(results)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or replace a deployment record.
    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        self.put(DEPLOYMENTS, &deployment.id, deployment)?;
        debug!(id = %deployment.id, state = ?deployment.state, "deployment stored");
        Ok(())
    }

    pub fn get_deployment(&self, id: &str) -> StateResult<Option<Deployment>> {
        self.get(DEPLOYMENTS, id)
    }

    /// List all deployments, oldest first.
    pub fn list_deployments(&self) -> StateResult<Vec<Deployment>> {
        let mut all: Vec<Deployment> = self.list(DEPLOYMENTS, "")?;
        all.sort_by_key(|d| d.started_at_ms);
        Ok(all)
    }

    pub fn list_deployments_for_service(&self, service: &str) -> StateResult<Vec<Deployment>> {
        Ok(self
            .list_deployments()?
            .into_iter()
            .filter(|d| d.service == service)
            .collect())
    }

    // ── Scaling ────────────────────────────────────────────────────

    pub fn put_scaling_state(&self, state: &ScalingState) -> StateResult<()> {
        self.put(SCALING_STATE, &state.service, state)
    }

    pub fn get_scaling_state(&self, service: &str) -> StateResult<Option<ScalingState>> {
        self.get(SCALING_STATE, service)
    }

    pub fn list_scaling_states(&self) -> StateResult<Vec<ScalingState>> {
        self.list(SCALING_STATE, "")
    }

    /// Record an acted-on scaling decision.
    pub fn record_scaling_event(&self, event: &ScalingEvent) -> StateResult<()> {
        self.put(SCALING_HISTORY, &event.table_key(), event)
    }

    /// Most recent `limit` scaling events for a service, newest first.
    pub fn list_scaling_events(&self, service: &str, limit: usize) -> StateResult<Vec<ScalingEvent>> {
        let prefix = format!("{service}:");
        let mut events: Vec<ScalingEvent> = self.list(SCALING_HISTORY, &prefix)?;
        events.reverse();
        events.truncate(limit);
        Ok(events)
    }

    // ── Chaos ──────────────────────────────────────────────────────

    pub fn put_chaos_result(&self, result: &ChaosResult) -> StateResult<()> {
        self.put(CHAOS_RESULTS, &result.run_id, result)?;
        debug!(run_id = %result.run_id, experiment = %result.experiment, "chaos result stored");
        Ok(())
    }

    pub fn get_chaos_result(&self, run_id: &str) -> StateResult<Option<ChaosResult>> {
        self.get(CHAOS_RESULTS, run_id)
    }

    /// List chaos results, oldest first.
    pub fn list_chaos_results(&self) -> StateResult<Vec<ChaosResult>> {
        let mut all: Vec<ChaosResult> = self.list(CHAOS_RESULTS, "")?;
        all.sort_by_key(|r| r.started_at_ms);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::{
        ArtifactConfig, Conclusion, DeploymentState, DeploymentStrategy, Hypothesis, ScaleAction,
    };

    fn deployment(id: &str, service: &str, started: u64) -> Deployment {
        Deployment::new(
            id,
            service,
            ArtifactConfig::version("v2"),
            DeploymentStrategy::BlueGreen,
            started,
        )
    }

    fn decision(from: u32, to: u32) -> ScaleDecision {
        ScaleDecision {
            action: if to > from {
                ScaleAction::ScaleUp
            } else {
                ScaleAction::ScaleDown
            },
            from,
            to,
            reason: "test".to_string(),
        }
    }

    #[test]
    fn deployment_roundtrip_and_update() {
        let store = StateStore::open_in_memory().unwrap();
        let mut d = deployment("deploy-1", "api", 1000);
        store.put_deployment(&d).unwrap();

        d.state = DeploymentState::Completed;
        store.put_deployment(&d).unwrap();

        let back = store.get_deployment("deploy-1").unwrap().unwrap();
        assert_eq!(back.state, DeploymentState::Completed);
        assert!(store.get_deployment("missing").unwrap().is_none());
    }

    #[test]
    fn float_metrics_read_back_bit_for_bit() {
        let store = StateStore::open_in_memory().unwrap();
        let mut d = deployment("deploy-f", "api", 1000);
        d.failure = Some(autopilot_core::FailureReport {
            stage: "monitoring".to_string(),
            reason: "error rate too high".to_string(),
            metrics: Some(autopilot_core::ServiceMetrics {
                error_rate: 0.1 + 0.2,
                cpu: (0.2 + 0.2 + 0.2) / 3.0,
                ..Default::default()
            }),
        });
        store.put_deployment(&d).unwrap();

        assert_eq!(store.get_deployment("deploy-f").unwrap().unwrap(), d);
    }

    #[test]
    fn deployments_listed_oldest_first_and_by_service() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_deployment(&deployment("b", "api", 2000)).unwrap();
        store.put_deployment(&deployment("a", "web", 3000)).unwrap();
        store.put_deployment(&deployment("c", "api", 1000)).unwrap();

        let ids: Vec<_> = store
            .list_deployments()
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(store.list_deployments_for_service("api").unwrap().len(), 2);
    }

    #[test]
    fn scaling_state_is_keyed_by_service() {
        let store = StateStore::open_in_memory().unwrap();
        let state = ScalingState {
            service: "api".to_string(),
            last_action: ScaleAction::ScaleUp,
            instances: 3,
            timestamp_ms: 42,
        };
        store.put_scaling_state(&state).unwrap();
        assert_eq!(store.get_scaling_state("api").unwrap(), Some(state));
        assert_eq!(store.list_scaling_states().unwrap().len(), 1);
    }

    #[test]
    fn scaling_history_is_newest_first_per_service() {
        let store = StateStore::open_in_memory().unwrap();
        for (ts, to) in [(100, 3), (200, 4), (300, 5)] {
            store
                .record_scaling_event(&ScalingEvent {
                    service: "api".to_string(),
                    decision: decision(to - 1, to),
                    timestamp_ms: ts,
                })
                .unwrap();
        }
        store
            .record_scaling_event(&ScalingEvent {
                service: "api-gateway".to_string(),
                decision: decision(1, 2),
                timestamp_ms: 150,
            })
            .unwrap();

        let events = store.list_scaling_events("api", 2).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp_ms, 300);
        assert_eq!(events[1].timestamp_ms, 200);
    }

    #[test]
    fn chaos_results_roundtrip() {
        let store = StateStore::open_in_memory().unwrap();
        let result = ChaosResult {
            run_id: "run-1".to_string(),
            experiment: "latency".to_string(),
            service: "api".to_string(),
            hypothesis: Hypothesis {
                description: "stays up".to_string(),
                max_avg_error_rate: 5.0,
                max_response_time_ms: 1000.0,
            },
            started_at_ms: 10,
            ended_at_ms: 20,
            observations: Vec::new(),
            conclusion: Conclusion {
                hypothesis_verified: true,
                findings: vec!["stable".to_string()],
                recommendations: Vec::new(),
            },
            error: None,
        };
        store.put_chaos_result(&result).unwrap();
        assert_eq!(store.get_chaos_result("run-1").unwrap(), Some(result));
        assert_eq!(store.list_chaos_results().unwrap().len(), 1);
    }

    #[test]
    fn persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autopilot.redb");
        {
            let store = StateStore::open(&path).unwrap();
            store.put_deployment(&deployment("d1", "api", 1)).unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        assert!(store.get_deployment("d1").unwrap().is_some());
    }
}
