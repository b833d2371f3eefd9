//! Deployment registry — live snapshots by id and one active run per
//! service. Terminal deployments leave the registry; the state store
//! keeps them.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use tracing::info;

use autopilot_core::Deployment;

use crate::error::{RolloutError, RolloutResult};

struct Entry {
    snapshot: Deployment,
    stop_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// service → id of its non-terminal deployment.
    active: HashMap<String, String>,
}

/// Shared view of deployments. Cheap to clone.
#[derive(Clone, Default)]
pub struct DeploymentRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl DeploymentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new deployment and hand back its stop receiver.
    ///
    /// Refused while the service has another active deployment.
    pub async fn begin(&self, deployment: &Deployment) -> RolloutResult<watch::Receiver<bool>> {
        let mut inner = self.inner.write().await;
        if let Some(id) = inner.active.get(&deployment.service) {
            return Err(RolloutError::AlreadyInProgress {
                service: deployment.service.clone(),
                id: id.clone(),
            });
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        inner
            .active
            .insert(deployment.service.clone(), deployment.id.clone());
        inner.entries.insert(
            deployment.id.clone(),
            Entry {
                snapshot: deployment.clone(),
                stop_tx,
            },
        );
        Ok(stop_rx)
    }

    /// Replace the snapshot. A terminal snapshot drops the entry and
    /// frees the service.
    pub async fn update(&self, deployment: &Deployment) {
        let mut inner = self.inner.write().await;
        if deployment.state.is_terminal() {
            inner.entries.remove(&deployment.id);
            if inner.active.get(&deployment.service) == Some(&deployment.id) {
                inner.active.remove(&deployment.service);
            }
        } else if let Some(entry) = inner.entries.get_mut(&deployment.id) {
            entry.snapshot = deployment.clone();
        }
    }

    pub async fn get(&self, id: &str) -> Option<Deployment> {
        self.inner
            .read()
            .await
            .entries
            .get(id)
            .map(|e| e.snapshot.clone())
    }

    /// All known deployments, oldest first.
    pub async fn list(&self) -> Vec<Deployment> {
        let mut all: Vec<Deployment> = self
            .inner
            .read()
            .await
            .entries
            .values()
            .map(|e| e.snapshot.clone())
            .collect();
        all.sort_by(|a, b| a.started_at_ms.cmp(&b.started_at_ms).then(a.id.cmp(&b.id)));
        all
    }

    pub async fn active_for(&self, service: &str) -> Option<String> {
        self.inner.read().await.active.get(service).cloned()
    }

    /// Signal a running deployment to stop; it rolls back at its next poll.
    pub async fn stop(&self, id: &str) -> RolloutResult<()> {
        let inner = self.inner.read().await;
        let entry = inner
            .entries
            .get(id)
            .ok_or_else(|| RolloutError::NotFound(id.to_string()))?;
        if entry.snapshot.state.is_terminal() {
            return Err(RolloutError::AlreadyFinished(id.to_string()));
        }
        let _ = entry.stop_tx.send(true);
        info!(deployment = %id, "stop requested");
        Ok(())
    }

    /// Signal every registered deployment; returns how many were running.
    pub async fn stop_all(&self) -> usize {
        let inner = self.inner.read().await;
        for (id, entry) in &inner.entries {
            let _ = entry.stop_tx.send(true);
            info!(deployment = %id, "stop requested");
        }
        inner.entries.len()
    }
}
