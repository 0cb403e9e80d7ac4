use crate::error::{BoostError, Result};
use crate::models::BotKind;
use crate::plans::PlanTable;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::warn;

/// RAM consommée par un bot côté serveur, en GB.
pub const DEFAULT_UNITS_PER_BOT: f64 = 0.53;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostConfig {
    /// Registry initial des bot-servers.
    pub hosts: Vec<String>,
    pub capacity: CapacityConf,
    pub backend: BackendConf,
    pub health: HealthConf,
    pub plans: PlanTable,
    pub http: HttpConf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConf {
    pub units_per_viewer: f64,
    pub units_per_chatter: f64,
    pub reservation_ttl_secs: u64,
    pub utilization_ceiling_percent: f64,
    pub release_reservations_on_failure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConf {
    pub scheme: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub health_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConf {
    pub poll_interval_secs: u64,
    pub stale_after_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
    pub registry_file: String,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            capacity: CapacityConf::default(),
            backend: BackendConf::default(),
            health: HealthConf::default(),
            plans: PlanTable::default(),
            http: HttpConf::default(),
        }
    }
}

impl Default for CapacityConf {
    fn default() -> Self {
        Self {
            units_per_viewer: DEFAULT_UNITS_PER_BOT,
            units_per_chatter: DEFAULT_UNITS_PER_BOT,
            reservation_ttl_secs: 5 * 60,
            utilization_ceiling_percent: 95.0,
            release_reservations_on_failure: false,
        }
    }
}

impl CapacityConf {
    pub fn units_for(&self, kind: BotKind, bots: u32) -> f64 {
        let per_bot = match kind {
            BotKind::Viewer => self.units_per_viewer,
            BotKind::Chatter => self.units_per_chatter,
        };
        per_bot * bots as f64
    }
}

impl Default for BackendConf {
    fn default() -> Self {
        Self {
            scheme: "https".into(),
            port: 5000,
            request_timeout_secs: 10,
            health_path: "/health".into(),
        }
    }
}

impl BackendConf {
    pub fn url(&self, host: &str, path: &str) -> String {
        format!("{}://{}:{}{}", self.scheme, host, self.port, path)
    }
}

impl Default for HealthConf {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            stale_after_secs: 90,
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            registry_file: "./data/hosts.json".into(),
        }
    }
}

impl BoostConfig {
    pub fn from_yaml(txt: &str) -> Result<Self> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Self = serde_yaml::from_str(txt)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.capacity;
        if !(c.units_per_viewer > 0.0 && c.units_per_chatter > 0.0) {
            return Err(BoostError::Config("units per bot must be positive".into()));
        }
        if !(c.utilization_ceiling_percent > 0.0 && c.utilization_ceiling_percent <= 100.0) {
            return Err(BoostError::Config("utilization ceiling must be in (0, 100]".into()));
        }
        if c.reservation_ttl_secs == 0 {
            return Err(BoostError::Config("reservation ttl must be > 0".into()));
        }
        if self.health.poll_interval_secs == 0 {
            return Err(BoostError::Config("health poll interval must be > 0".into()));
        }
        Ok(())
    }

    /// Charge la config depuis `BOOST_KERNEL_CONFIG` (défaut `kernel.yaml`).
    /// Fichier absent ou invalide : config par défaut.
    pub async fn load() -> Self {
        let path = std::env::var("BOOST_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
        Self::load_from(&path).await
    }

    pub async fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "no config file, using defaults");
            return Self::default();
        }
        let txt = fs::read_to_string(path).await.unwrap_or_default();
        Self::from_yaml(&txt).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "invalid config, using defaults");
            Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = BoostConfig::default();
        assert_eq!(cfg.backend.port, 5000);
        assert_eq!(cfg.capacity.reservation_ttl_secs, 300);
        assert_eq!(cfg.capacity.utilization_ceiling_percent, 95.0);
        assert!(!cfg.capacity.release_reservations_on_failure);
        assert_eq!(cfg.health.poll_interval_secs, 30);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg = BoostConfig::from_yaml(
            "hosts: [bot1.example.net, 10.0.0.7]\ncapacity:\n  units_per_viewer: 0.6\n",
        )
        .unwrap();
        assert_eq!(cfg.hosts, vec!["bot1.example.net", "10.0.0.7"]);
        assert_eq!(cfg.capacity.units_per_viewer, 0.6);
        assert_eq!(cfg.capacity.units_per_chatter, DEFAULT_UNITS_PER_BOT);
        assert_eq!(cfg.plans.default_plan, "Free");
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let cfg = BoostConfig::from_yaml("  \n").unwrap();
        assert!(cfg.hosts.is_empty());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(BoostConfig::from_yaml("capacity:\n  utilization_ceiling_percent: 120\n").is_err());
        assert!(BoostConfig::from_yaml("capacity:\n  units_per_viewer: 0\n").is_err());
        assert!(BoostConfig::from_yaml("hosts: 12").is_err());
    }

    #[test]
    fn test_units_and_urls() {
        let cfg = BoostConfig::default();
        assert!((cfg.capacity.units_for(BotKind::Viewer, 100) - 53.0).abs() < 1e-9);
        assert_eq!(cfg.backend.url("bot1", "/add_viewer"), "https://bot1:5000/add_viewer");
    }

    #[tokio::test]
    async fn test_load_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = BoostConfig::load_from(dir.path().join("nope.yaml")).await;
        assert_eq!(cfg.http.bind, "0.0.0.0:8080");
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.yaml");
        std::fs::write(&path, "backend:\n  port: 5050\n").unwrap();
        let cfg = BoostConfig::load_from(&path).await;
        assert_eq!(cfg.backend.port, 5050);
        assert_eq!(cfg.backend.scheme, "https");
    }
}
