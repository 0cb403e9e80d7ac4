use thiserror::Error;

/// Issues de politique et défauts du sous-système d'allocation.
///
/// `CapacityExhausted` et `InsufficientAllocation` sont des refus attendus :
/// la couche UI doit les afficher avec des messages distincts.
#[derive(Debug, Error)]
pub enum BoostError {
    #[error("no host can take {requested} more {kind}s right now")]
    CapacityExhausted { kind: crate::models::BotKind, requested: u32 },
    #[error("cannot remove {requested} units, only {available} allocated")]
    InsufficientAllocation { requested: u32, available: u32 },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Échec d'un appel HTTP vers un bot-server.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("transport error for {host}: {message}")]
    Transport { host: String, message: String },
    #[error("{host} answered HTTP {status}: {body}")]
    Status { host: String, status: u16, body: String },
    #[error("invalid payload from {host}: {message}")]
    Decode { host: String, message: String },
}

impl ApplyError {
    pub fn host(&self) -> &str {
        match self {
            ApplyError::Transport { host, .. }
            | ApplyError::Status { host, .. }
            | ApplyError::Decode { host, .. } => host,
        }
    }
}

pub type Result<T, E = BoostError> = std::result::Result<T, E>;
