//! Remediation registry — ordered playbooks per service.

use std::collections::HashMap;

use tracing::warn;

use autopilot_core::{Playbook, ServiceConfig, Symptom};

#[derive(Debug, Clone, Default)]
pub struct RemediationRegistry {
    playbooks: HashMap<String, Vec<Playbook>>,
}

impl RemediationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_services(services: &[ServiceConfig]) -> Self {
        let mut registry = Self::new();
        for svc in services {
            for playbook in &svc.playbooks {
                registry.register(&svc.name, playbook.clone());
            }
        }
        registry
    }

    /// Append a playbook. Registration order decides precedence.
    pub fn register(&mut self, service: &str, playbook: Playbook) {
        let existing = self.playbooks.entry(service.to_string()).or_default();
        if let Some(earlier) = existing
            .iter()
            .find(|p| p.triggers.iter().any(|t| playbook.triggers.contains(t)))
        {
            warn!(
                %service,
                first = %earlier.name,
                shadowed = %playbook.name,
                "playbooks share triggers; the first registered one always wins"
            );
        }
        existing.push(playbook);
    }

    pub fn playbooks(&self, service: &str) -> &[Playbook] {
        self.playbooks.get(service).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First registered playbook whose triggers intersect `symptoms`.
    pub fn select(&self, service: &str, symptoms: &[Symptom]) -> Option<&Playbook> {
        self.playbooks(service).iter().find(|p| p.matches(symptoms))
    }
}
