/*!
Mock des bot-servers pour tests sans réseau

Enregistre toutes les commandes reçues et permet de simuler des hosts en panne
ou des health reports scriptés.
*/

use async_trait::async_trait;
use boost_core::{AddCommand, ApplyError, HealthReport, HostApi, RemoveCommand};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Add { host: String, cmd: AddCommand },
    Remove { host: String, cmd: RemoveCommand },
    Health { host: String },
}

impl RecordedCall {
    pub fn host(&self) -> &str {
        match self {
            RecordedCall::Add { host, .. }
            | RecordedCall::Remove { host, .. }
            | RecordedCall::Health { host } => host,
        }
    }
}

/// Mock qui implémente `HostApi` ; les clones partagent le même état.
#[derive(Clone, Default)]
pub struct MockHostApi {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    reports: Arc<Mutex<HashMap<String, HealthReport>>>,
}

impl MockHostApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toutes les commandes vers ce host répondent HTTP 500.
    pub fn fail_host(&self, host: &str) {
        self.failing.lock().insert(host.to_string());
    }

    pub fn heal_host(&self, host: &str) {
        self.failing.lock().remove(host);
    }

    /// Report servi par `GET /health`, en MB comme le vrai backend.
    pub fn set_report(&self, host: &str, total_mb: f64, used_mb: f64) {
        self.reports
            .lock()
            .insert(host.to_string(), HealthReport::from_mb(total_mb, used_mb));
    }

    /// Ajoute une charge CPU au report déjà scripté pour ce host.
    pub fn set_cpu(&self, host: &str, cpu: f32) {
        if let Some(report) = self.reports.lock().get_mut(host) {
            report.cpu = Some(cpu);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn adds(&self) -> Vec<(String, AddCommand)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RecordedCall::Add { host, cmd } => Some((host.clone(), cmd.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn removes(&self) -> Vec<(String, RemoveCommand)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RecordedCall::Remove { host, cmd } => Some((host.clone(), cmd.clone())),
                _ => None,
            })
            .collect()
    }

    fn check(&self, host: &str) -> Result<(), ApplyError> {
        if self.failing.lock().contains(host) {
            return Err(ApplyError::Status {
                host: host.to_string(),
                status: 500,
                body: "simulated failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl HostApi for MockHostApi {
    async fn add(&self, host: &str, cmd: &AddCommand) -> Result<(), ApplyError> {
        self.calls.lock().push(RecordedCall::Add {
            host: host.to_string(),
            cmd: cmd.clone(),
        });
        tracing::debug!(host, count = cmd.count, "[mock] add");
        self.check(host)
    }

    async fn remove(&self, host: &str, cmd: &RemoveCommand) -> Result<(), ApplyError> {
        self.calls.lock().push(RecordedCall::Remove {
            host: host.to_string(),
            cmd: cmd.clone(),
        });
        tracing::debug!(host, count = cmd.count, "[mock] remove");
        self.check(host)
    }

    async fn health(&self, host: &str) -> Result<HealthReport, ApplyError> {
        self.calls.lock().push(RecordedCall::Health { host: host.to_string() });
        self.check(host)?;
        self.reports
            .lock()
            .get(host)
            .cloned()
            .ok_or_else(|| ApplyError::Transport {
                host: host.to_string(),
                message: "connection refused".into(),
            })
    }
}
