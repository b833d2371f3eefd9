//! Metrics pushed in through the operator API.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use autopilot_core::{MetricsSource, PlatformError, PlatformResult, ServiceMetrics};

/// Latest snapshot per service, as last recorded by an external agent.
#[derive(Clone, Default)]
pub struct PushedMetrics {
    latest: Arc<RwLock<HashMap<String, ServiceMetrics>>>,
}

impl PushedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, service: &str, metrics: ServiceMetrics) {
        self.latest
            .write()
            .await
            .insert(service.to_string(), metrics);
    }
}

#[async_trait]
impl MetricsSource for PushedMetrics {
    async fn get_metrics(&self, service: &str) -> PlatformResult<ServiceMetrics> {
        self.latest
            .read()
            .await
            .get(service)
            .copied()
            .ok_or_else(|| PlatformError::MetricsUnavailable(service.to_string()))
    }
}
