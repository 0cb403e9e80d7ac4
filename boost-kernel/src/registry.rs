/**
 * HOST REGISTRY - Liste administrable des bot-servers candidats
 *
 * RÔLE : Persistance JSON des hostnames (seedée depuis la config au premier
 * démarrage), ajout/retrait via l'API admin. Le core ne possède pas cette
 * liste : elle est passée en entrée à chaque choix de host et au poller health.
 *
 * Retirer un host arrête de le proposer ; ses allocations existantes restent
 * dans le ledger jusqu'à ce qu'elles soient vidées.
 */

use boost_core::error::{BoostError, Result};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub struct HostRegistry {
    hosts: RwLock<Vec<String>>,
    data_file: PathBuf,
}

pub type SharedHostRegistry = Arc<HostRegistry>;

impl HostRegistry {
    pub fn new(data_file: impl AsRef<Path>) -> Self {
        Self {
            hosts: RwLock::new(Vec::new()),
            data_file: data_file.as_ref().to_path_buf(),
        }
    }

    /// Charge le fichier JSON ; s'il n'existe pas, part de `seed` et l'écrit.
    pub async fn load_or_seed(&self, seed: &[String]) -> Result<()> {
        if !self.data_file.exists() {
            let mut hosts = Vec::new();
            for host in seed {
                let host = normalize(host)?;
                if !hosts.contains(&host) {
                    hosts.push(host);
                }
            }
            *self.hosts.write() = hosts;
            self.save().await?;
            info!(count = seed.len(), file = %self.data_file.display(), "host registry seeded from config");
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.data_file).await?;
        let hosts: Vec<String> = serde_json::from_str(&content)?;
        info!(count = hosts.len(), file = %self.data_file.display(), "host registry loaded");
        *self.hosts.write() = hosts;
        Ok(())
    }

    pub async fn save(&self) -> Result<()> {
        let snapshot = self.list();
        if let Some(parent) = self.data_file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(&self.data_file, content).await?;
        Ok(())
    }

    /// Hosts dans l'ordre d'enregistrement (c'est l'ordre de départage du tracker).
    pub fn list(&self) -> Vec<String> {
        self.hosts.read().clone()
    }

    pub fn contains(&self, host: &str) -> bool {
        self.hosts.read().iter().any(|h| h == host)
    }

    /// `false` si le host était déjà enregistré.
    pub async fn add(&self, host: &str) -> Result<bool> {
        let host = normalize(host)?;
        {
            let mut hosts = self.hosts.write();
            if hosts.contains(&host) {
                return Ok(false);
            }
            hosts.push(host.clone());
        }
        self.save().await?;
        info!(host = %host, "host registered");
        Ok(true)
    }

    /// `false` si le host n'était pas enregistré.
    pub async fn remove(&self, host: &str) -> Result<bool> {
        let removed = {
            let mut hosts = self.hosts.write();
            let before = hosts.len();
            hosts.retain(|h| h != host);
            before != hosts.len()
        };
        if removed {
            self.save().await?;
            info!(host, "host unregistered");
        }
        Ok(removed)
    }
}

// Hostname ou IP nu, sans schéma ni port : l'URL est construite par le client.
fn normalize(host: &str) -> Result<String> {
    let host = host.trim();
    if host.is_empty() {
        return Err(BoostError::InvalidRequest("host is empty".into()));
    }
    if host.contains("://") || host.contains('/') || host.contains(':') || host.contains(char::is_whitespace) {
        return Err(BoostError::InvalidRequest(format!("invalid host name: {host}")));
    }
    Ok(host.to_ascii_lowercase())
}
