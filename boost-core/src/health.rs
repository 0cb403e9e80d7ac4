//! Ingestion périodique des health reports des bot-servers.
//!
//! Chaque host expose `GET /health` avec la forme du statut psutil :
//! `{"cpu": 12.5, "memory": {"total": MB, "used": MB, "free": MB}}`.
//! La RAM est convertie en GB (unités de capacité) puis passée au tracker.

use crate::apply::HostApi;
use crate::capacity::CapacityTracker;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const MB_PER_UNIT: f64 = 1024.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub cpu: Option<f32>,
    pub memory: MemoryReport,
}

/// Valeurs en MB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryReport {
    pub total: f64,
    pub used: f64,
    pub free: Option<f64>,
}

impl HealthReport {
    pub fn from_mb(total_mb: f64, used_mb: f64) -> Self {
        Self {
            cpu: None,
            memory: MemoryReport {
                total: total_mb,
                used: used_mb,
                free: Some((total_mb - used_mb).max(0.0)),
            },
        }
    }

    /// (capacité totale, capacité utilisée) en unités.
    pub fn capacity_units(&self) -> (f64, f64) {
        (self.memory.total / MB_PER_UNIT, self.memory.used / MB_PER_UNIT)
    }

    fn is_sane(&self) -> bool {
        let m = &self.memory;
        m.total.is_finite() && m.used.is_finite() && m.total >= 0.0 && m.used >= 0.0
    }
}

pub struct HealthPoller {
    tracker: Arc<CapacityTracker>,
    api: Arc<dyn HostApi>,
    interval: Duration,
}

impl HealthPoller {
    pub fn new(tracker: Arc<CapacityTracker>, api: Arc<dyn HostApi>, interval: Duration) -> Self {
        Self { tracker, api, interval }
    }

    /// Interroge tous les hosts en parallèle ; retourne le nombre de reports ingérés.
    /// Un host en échec garde ses métriques précédentes.
    pub async fn poll_once(&self, hosts: &[String]) -> usize {
        let results = join_all(hosts.iter().map(|host| async move {
            (host, self.api.health(host).await)
        }))
        .await;

        let mut ingested = 0;
        for (host, result) in results {
            match result {
                Ok(report) if report.is_sane() => {
                    let (total, used) = report.capacity_units();
                    self.tracker.ingest_health_report(host, total, used);
                    self.tracker.record_cpu(host, report.cpu);
                    debug!(host = %host, total, used, "health report ingested");
                    ingested += 1;
                }
                Ok(report) => warn!(host = %host, ?report, "malformed health report dropped"),
                Err(e) => warn!(host = %host, error = %e, "health check failed"),
            }
        }
        ingested
    }

    /// Démarre la boucle de polling ; `hosts` est relu à chaque tick
    /// pour suivre les changements du registry.
    pub fn spawn<F>(self, hosts: F) -> JoinHandle<()>
    where
        F: Fn() -> Vec<String> + Send + Sync + 'static,
    {
        info!(interval_secs = self.interval.as_secs(), "starting health poller");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            loop {
                interval.tick().await;
                let list = hosts();
                let ingested = self.poll_once(&list).await;
                debug!(ingested, polled = list.len(), "health poll round done");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_payload() {
        let report: HealthReport = serde_json::from_str(
            r#"{"cpu": 37.5, "memory": {"total": 16384.0, "used": 4096.0, "free": 12288.0}}"#,
        )
        .unwrap();
        assert_eq!(report.cpu, Some(37.5));
        assert_eq!(report.capacity_units(), (16.0, 4.0));
    }

    #[test]
    fn test_cpu_and_free_are_optional() {
        let report: HealthReport =
            serde_json::from_str(r#"{"memory": {"total": 2048, "used": 512}}"#).unwrap();
        assert_eq!(report.cpu, None);
        assert_eq!(report.capacity_units(), (2.0, 0.5));
    }

    #[test]
    fn test_sanity_check() {
        assert!(HealthReport::from_mb(1024.0, 100.0).is_sane());
        assert!(!HealthReport::from_mb(-1.0, 0.0).is_sane());
        assert!(!HealthReport::from_mb(1024.0, f64::NAN).is_sane());
    }
}
