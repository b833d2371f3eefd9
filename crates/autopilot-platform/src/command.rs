//! Command-hook platform.
//!
//! Every collaborator operation maps to an operator-supplied shell
//! template from `[platform.commands]`. Placeholders are substituted with
//! shell-quoted values, the command runs under the configured shell, and
//! its stdout carries any result (a count, a version, JSON metrics).
//! Operations without a template fail with `PlatformError::Unsupported`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use autopilot_core::config::CommandTemplates;
use autopilot_core::*;

use crate::probe::http_probe;

/// Quote a value for POSIX `sh`.
fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@%+=,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Substitute `{name}` placeholders. Unknown placeholders are left as-is.
fn render(template: &str, vars: &[(&str, String)], params: &BTreeMap<String, String>) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), &shell_quote(value));
    }
    for (name, value) in params {
        out = out.replace(&format!("{{param.{name}}}"), &shell_quote(value));
    }
    out
}

/// Platform backed by shell command templates.
#[derive(Debug, Clone)]
pub struct CommandPlatform {
    templates: CommandTemplates,
    probe_timeout: Duration,
}

impl CommandPlatform {
    pub fn new(templates: CommandTemplates, probe_timeout: Duration) -> Self {
        Self {
            templates,
            probe_timeout,
        }
    }

    fn template<'a>(&self, op: &'static str, template: &'a Option<String>) -> PlatformResult<&'a str> {
        template
            .as_deref()
            .ok_or_else(|| PlatformError::Unsupported(format!("no command configured for {op}")))
    }

    /// Run a rendered command; non-zero exit is an error carrying stderr.
    async fn exec(&self, op: &'static str, command: &str) -> PlatformResult<String> {
        debug!(op, %command, "running platform command");
        let output = Command::new(&self.templates.shell)
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PlatformError::operation(op, e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(op, status = ?output.status.code(), %stderr, "platform command failed");
            Err(PlatformError::operation(
                op,
                if stderr.is_empty() {
                    format!("exit status {:?}", output.status.code())
                } else {
                    stderr
                },
            ))
        }
    }

    async fn run(
        &self,
        op: &'static str,
        template: &Option<String>,
        vars: &[(&str, String)],
        params: &BTreeMap<String, String>,
    ) -> PlatformResult<String> {
        let template = self.template(op, template)?;
        self.exec(op, &render(template, vars, params)).await
    }

    /// Action flavour: command failures become unsuccessful outcomes.
    async fn run_action(
        &self,
        op: &'static str,
        template: &Option<String>,
        vars: &[(&str, String)],
        params: &BTreeMap<String, String>,
    ) -> PlatformResult<ActionOutcome> {
        let template = self.template(op, template)?;
        Ok(match self.exec(op, &render(template, vars, params)).await {
            Ok(stdout) => ActionOutcome::ok(stdout),
            Err(e) => ActionOutcome::failed(e.to_string()),
        })
    }
}

fn service_var(service: &str) -> (&'static str, String) {
    ("service", service.to_string())
}

fn fault_vars(service: &str, fault: &FaultSpec) -> Vec<(&'static str, String)> {
    let kind = serde_json::to_value(fault.kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    vec![service_var(service), ("fault", kind)]
}

#[async_trait]
impl MetricsSource for CommandPlatform {
    async fn get_metrics(&self, service: &str) -> PlatformResult<ServiceMetrics> {
        let stdout = self
            .run(
                "get_metrics",
                &self.templates.get_metrics,
                &[service_var(service)],
                &BTreeMap::new(),
            )
            .await
            .map_err(|e| match e {
                PlatformError::Unsupported(_) => e,
                other => PlatformError::MetricsUnavailable(format!("{service}: {other}")),
            })?;
        serde_json::from_str(&stdout)
            .map_err(|e| PlatformError::MetricsUnavailable(format!("{service}: {e}")))
    }
}

#[async_trait]
impl PlatformController for CommandPlatform {
    async fn get_instance_count(&self, service: &str) -> PlatformResult<u32> {
        let stdout = self
            .run(
                "get_instance_count",
                &self.templates.get_instance_count,
                &[service_var(service)],
                &BTreeMap::new(),
            )
            .await?;
        stdout
            .parse()
            .map_err(|_| PlatformError::operation("get_instance_count", format!("not a count: {stdout:?}")))
    }

    async fn set_instance_count(&self, service: &str, count: u32) -> PlatformResult<()> {
        self.run(
            "set_instance_count",
            &self.templates.set_instance_count,
            &[service_var(service), ("count", count.to_string())],
            &BTreeMap::new(),
        )
        .await
        .map(drop)
    }

    /// Each non-empty stdout line is taken as a health endpoint of the slot.
    async fn deploy_to_slot(
        &self,
        service: &str,
        slot: &str,
        config: &ArtifactConfig,
    ) -> PlatformResult<SlotHandle> {
        let stdout = self
            .run(
                "deploy_to_slot",
                &self.templates.deploy_to_slot,
                &[
                    service_var(service),
                    ("slot", slot.to_string()),
                    ("version", config.version.clone()),
                ],
                &config.params,
            )
            .await?;
        Ok(SlotHandle {
            service: service.to_string(),
            slot: slot.to_string(),
            version: config.version.clone(),
            endpoints: stdout
                .lines()
                .map(str::trim)
                .filter(|l| l.starts_with("http://"))
                .map(str::to_string)
                .collect(),
        })
    }

    async fn switch_traffic(&self, service: &str, target: &TrafficTarget) -> PlatformResult<()> {
        let vars = match target {
            TrafficTarget::Slot { slot } => vec![
                service_var(service),
                ("target", slot.clone()),
                ("slot", slot.clone()),
                ("percentage", "100".to_string()),
            ],
            TrafficTarget::Canary {
                version,
                percentage,
            } => vec![
                service_var(service),
                ("target", version.clone()),
                ("version", version.clone()),
                ("percentage", percentage.to_string()),
            ],
        };
        self.run(
            "switch_traffic",
            &self.templates.switch_traffic,
            &vars,
            &BTreeMap::new(),
        )
        .await
        .map(drop)
    }

    async fn check_endpoint(&self, url: &str) -> PlatformResult<EndpointResponse> {
        http_probe(url, self.probe_timeout).await
    }

    async fn cleanup_slot(&self, service: &str, slot: &str) -> PlatformResult<()> {
        self.run(
            "cleanup_slot",
            &self.templates.cleanup_slot,
            &[service_var(service), ("slot", slot.to_string())],
            &BTreeMap::new(),
        )
        .await
        .map(drop)
    }

    async fn get_previous_version(&self, service: &str) -> PlatformResult<VersionRef> {
        let version = self
            .run(
                "get_previous_version",
                &self.templates.get_previous_version,
                &[service_var(service)],
                &BTreeMap::new(),
            )
            .await?;
        if version.is_empty() {
            return Err(PlatformError::operation(
                "get_previous_version",
                format!("no previous version recorded for {service}"),
            ));
        }
        Ok(VersionRef { version })
    }

    async fn inject_fault(&self, service: &str, fault: &FaultSpec) -> PlatformResult<()> {
        self.run(
            "inject_fault",
            &self.templates.inject_fault,
            &fault_vars(service, fault),
            &fault.params,
        )
        .await
        .map(drop)
    }

    async fn revert_fault(&self, service: &str, fault: &FaultSpec) -> PlatformResult<()> {
        self.run(
            "revert_fault",
            &self.templates.revert_fault,
            &fault_vars(service, fault),
            &fault.params,
        )
        .await
        .map(drop)
    }
}

#[async_trait]
impl ActionRunner for CommandPlatform {
    async fn restart(
        &self,
        service: &str,
        params: &BTreeMap<String, String>,
    ) -> PlatformResult<ActionOutcome> {
        self.run_action("restart", &self.templates.restart, &[service_var(service)], params)
            .await
    }

    async fn scale(&self, service: &str, delta: i32) -> PlatformResult<ActionOutcome> {
        self.run_action(
            "scale",
            &self.templates.scale,
            &[service_var(service), ("delta", delta.to_string())],
            &BTreeMap::new(),
        )
        .await
    }

    async fn clear_cache(&self, service: &str) -> PlatformResult<ActionOutcome> {
        self.run_action(
            "clear_cache",
            &self.templates.clear_cache,
            &[service_var(service)],
            &BTreeMap::new(),
        )
        .await
    }

    async fn reset_connections(&self, service: &str) -> PlatformResult<ActionOutcome> {
        self.run_action(
            "reset_connections",
            &self.templates.reset_connections,
            &[service_var(service)],
            &BTreeMap::new(),
        )
        .await
    }

    async fn failover(
        &self,
        service: &str,
        params: &BTreeMap<String, String>,
    ) -> PlatformResult<ActionOutcome> {
        self.run_action("failover", &self.templates.failover, &[service_var(service)], params)
            .await
    }

    /// Scripts are run as-is under the configured shell.
    async fn run_script(&self, script: &str) -> PlatformResult<ActionOutcome> {
        Ok(match self.exec("run_script", script).await {
            Ok(stdout) => ActionOutcome::ok(stdout),
            Err(e) => ActionOutcome::failed(e.to_string()),
        })
    }
}

#[async_trait]
impl ResourceProvider for CommandPlatform {
    async fn current_resources(&self) -> PlatformResult<BTreeMap<String, Value>> {
        let stdout = self
            .run(
                "list_resources",
                &self.templates.list_resources,
                &[],
                &BTreeMap::new(),
            )
            .await?;
        if stdout.is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&stdout)
            .map_err(|e| PlatformError::operation("list_resources", e.to_string()))
    }

    async fn apply_change(&self, change: &InfrastructureChange) -> PlatformResult<()> {
        let action = serde_json::to_value(change.action)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let config = change
            .desired
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_else(|| "null".to_string());
        self.run(
            "apply_change",
            &self.templates.apply_change,
            &[
                ("action", action),
                ("resource", change.resource.clone()),
                ("config", config),
            ],
            &BTreeMap::new(),
        )
        .await
        .map(drop)
    }
}
