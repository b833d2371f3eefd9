//! Endpoint probing and verdict aggregation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use autopilot_core::{
    EndpointCheck, HealthVerdict, PlatformController, ServiceConfig, epoch_millis,
};

/// Probe one endpoint. Healthy means a 2xx answer within `timeout`.
pub async fn probe_endpoint(
    platform: &dyn PlatformController,
    url: &str,
    timeout: Duration,
) -> EndpointCheck {
    let limit_ms = timeout.as_millis() as u64;
    match tokio::time::timeout(timeout, platform.check_endpoint(url)).await {
        Ok(Ok(resp)) => {
            let in_time = resp.duration_ms <= limit_ms;
            let healthy = (200..300).contains(&resp.status_code) && in_time;
            if !healthy {
                debug!(%url, status = resp.status_code, duration_ms = resp.duration_ms, "endpoint unhealthy");
            }
            EndpointCheck {
                endpoint: url.to_string(),
                status_code: Some(resp.status_code),
                duration_ms: resp.duration_ms,
                healthy,
                error: (!in_time).then(|| format!("slower than {limit_ms}ms")),
            }
        }
        Ok(Err(e)) => {
            debug!(%url, error = %e, "endpoint probe failed");
            EndpointCheck {
                endpoint: url.to_string(),
                status_code: None,
                duration_ms: 0,
                healthy: false,
                error: Some(e.to_string()),
            }
        }
        Err(_) => {
            debug!(%url, "endpoint probe timed out");
            EndpointCheck {
                endpoint: url.to_string(),
                status_code: None,
                duration_ms: limit_ms,
                healthy: false,
                error: Some(format!("timed out after {limit_ms}ms")),
            }
        }
    }
}

/// Probes the statically registered endpoints of each service.
#[derive(Clone)]
pub struct HealthChecker {
    platform: Arc<dyn PlatformController>,
    endpoints: BTreeMap<String, Vec<String>>,
    timeout: Duration,
}

impl HealthChecker {
    pub fn new(platform: Arc<dyn PlatformController>, timeout: Duration) -> Self {
        Self {
            platform,
            endpoints: BTreeMap::new(),
            timeout,
        }
    }

    /// Build a checker for every configured service with endpoints.
    pub fn from_services(
        platform: Arc<dyn PlatformController>,
        timeout: Duration,
        services: &[ServiceConfig],
    ) -> Self {
        let mut checker = Self::new(platform, timeout);
        for svc in services.iter().filter(|s| !s.endpoints.is_empty()) {
            checker.register(&svc.name, svc.endpoints.clone());
        }
        checker
    }

    pub fn register(&mut self, service: &str, endpoints: Vec<String>) {
        self.endpoints.insert(service.to_string(), endpoints);
    }

    pub fn with_service(mut self, service: &str, endpoints: Vec<String>) -> Self {
        self.register(service, endpoints);
        self
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    pub fn endpoints(&self, service: &str) -> &[String] {
        self.endpoints.get(service).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe the registered endpoints of `service`.
    pub async fn check(&self, service: &str) -> HealthVerdict {
        self.check_endpoints(service, self.endpoints(service)).await
    }

    /// Probe an explicit endpoint list on behalf of `service`.
    pub async fn check_endpoints(&self, service: &str, endpoints: &[String]) -> HealthVerdict {
        let mut checks = Vec::with_capacity(endpoints.len());
        for url in endpoints {
            checks.push(probe_endpoint(self.platform.as_ref(), url, self.timeout).await);
        }
        HealthVerdict::from_checks(service, checks, epoch_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_platform::SimulatedPlatform;

    const A: &str = "http://api-a/health";
    const B: &str = "http://api-b/health";

    fn checker(sim: &SimulatedPlatform) -> HealthChecker {
        HealthChecker::new(Arc::new(sim.clone()), Duration::from_secs(5))
            .with_service("api", vec![A.to_string(), B.to_string()])
    }

    #[tokio::test]
    async fn all_endpoints_healthy() {
        let sim = SimulatedPlatform::new();
        sim.set_endpoint(A, 200, 20).await;
        sim.set_endpoint(B, 204, 40).await;

        let v = checker(&sim).check("api").await;
        assert!(v.healthy);
        assert_eq!(v.endpoints.len(), 2);
        assert_eq!(v.avg_response_time_ms, 30.0);
    }

    #[tokio::test]
    async fn one_failing_endpoint_makes_service_unhealthy() {
        let sim = SimulatedPlatform::new();
        sim.set_endpoint(A, 200, 20).await;
        sim.set_endpoint(B, 500, 20).await;

        let v = checker(&sim).check("api").await;
        assert!(!v.healthy);
        assert!(v.endpoints[0].healthy);
        assert_eq!(v.endpoints[1].status_code, Some(500));
    }

    #[tokio::test]
    async fn connection_failure_is_unhealthy() {
        let sim = SimulatedPlatform::new();
        sim.script_endpoint(A, vec![None]).await;

        let v = checker(&sim).check("api").await;
        assert!(!v.healthy);
        assert!(v.endpoints[0].error.is_some());
    }

    #[tokio::test]
    async fn slow_success_is_unhealthy() {
        let sim = SimulatedPlatform::new();
        sim.set_endpoint(A, 200, 6_000).await;

        let v = checker(&sim).check("api").await;
        assert!(!v.endpoints[0].healthy);
        assert!(v.endpoints[1].healthy);
    }

    #[tokio::test]
    async fn unregistered_service_has_no_endpoints() {
        let sim = SimulatedPlatform::new();
        let v = checker(&sim).check("web").await;
        assert!(v.endpoints.is_empty());
        assert!(v.healthy);
    }
}
