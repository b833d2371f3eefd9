//! Event log task: every automation event becomes a log line.

use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use autopilot_core::AutomationEvent;

fn log_event(event: &AutomationEvent) {
    let name = event.name();
    let subject = event.subject().unwrap_or("-");
    let detail = serde_json::to_string(event).unwrap_or_default();
    match event {
        AutomationEvent::Error { .. } | AutomationEvent::HealthIssue { .. } => {
            warn!(event = name, %subject, %detail, "automation event");
        }
        AutomationEvent::DeploymentFailed { .. } => {
            error!(event = name, %subject, %detail, "automation event");
        }
        AutomationEvent::Remediation { success: false, .. } => {
            warn!(event = name, %subject, %detail, "automation event");
        }
        _ => info!(event = name, %subject, %detail, "automation event"),
    }
}

/// Drain the bus until shutdown or until every sender is gone.
pub async fn log_events(
    mut rx: broadcast::Receiver<AutomationEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(event) => log_event(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => {
                info!("event log shutting down");
                break;
            }
        }
    }
}
