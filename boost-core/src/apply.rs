//! Commandes HTTP vers les bot-servers.
//!
//! `POST {scheme}://{host}:{port}/add_{viewer|chatter}` et
//! `/remove_{viewer|chatter}`, succès = HTTP 2xx. Le trait [`HostApi`] permet
//! de remplacer le transport dans les tests.

use crate::config::BackendConf;
use crate::error::ApplyError;
use crate::health::HealthReport;
use crate::models::{BotKind, StreamKey};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddCommand {
    pub user_id: String,
    pub twitch_url: String,
    pub count: u32,
    #[serde(skip)]
    pub kind: BotKind,
}

impl AddCommand {
    pub fn new(key: &StreamKey, count: u32) -> Self {
        Self {
            user_id: key.user_id.clone(),
            twitch_url: key.stream_url.clone(),
            count,
            kind: key.kind,
        }
    }

    pub fn path(&self) -> String {
        format!("/add_{}", self.kind.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoveCommand {
    pub user_id: String,
    pub twitch_url: String,
    pub count: u32,
    pub kind: BotKind,
}

impl RemoveCommand {
    pub fn new(key: &StreamKey, count: u32) -> Self {
        Self {
            user_id: key.user_id.clone(),
            twitch_url: key.stream_url.clone(),
            count,
            kind: key.kind,
        }
    }

    pub fn path(&self) -> String {
        format!("/remove_{}", self.kind.as_str())
    }

    /// Body JSON : le champ de quantité dépend du type (`viewer_count` / `chatter_count`).
    pub fn body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "user_id": self.user_id,
            "twitch_url": self.twitch_url,
        });
        body[self.kind.count_field()] = serde_json::json!(self.count);
        body
    }
}

#[async_trait]
pub trait HostApi: Send + Sync {
    async fn add(&self, host: &str, cmd: &AddCommand) -> Result<(), ApplyError>;
    async fn remove(&self, host: &str, cmd: &RemoveCommand) -> Result<(), ApplyError>;
    async fn health(&self, host: &str) -> Result<HealthReport, ApplyError>;
}

/// Client reqwest vers les bot-servers.
pub struct HttpHostApi {
    client: reqwest::Client,
    backend: BackendConf,
}

impl HttpHostApi {
    pub fn new(backend: BackendConf) -> Result<Self, ApplyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(backend.request_timeout_secs))
            .build()
            .map_err(|e| ApplyError::Transport {
                host: "*".into(),
                message: e.to_string(),
            })?;
        Ok(Self { client, backend })
    }

    async fn post(&self, host: &str, path: &str, body: &serde_json::Value) -> Result<(), ApplyError> {
        let url = self.backend.url(host, path);
        debug!(%url, "POST to bot server");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport(host, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApplyError::Status {
            host: host.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl HostApi for HttpHostApi {
    async fn add(&self, host: &str, cmd: &AddCommand) -> Result<(), ApplyError> {
        let body = serde_json::to_value(cmd).map_err(|e| ApplyError::Decode {
            host: host.to_string(),
            message: e.to_string(),
        })?;
        self.post(host, &cmd.path(), &body).await
    }

    async fn remove(&self, host: &str, cmd: &RemoveCommand) -> Result<(), ApplyError> {
        self.post(host, &cmd.path(), &cmd.body()).await
    }

    async fn health(&self, host: &str) -> Result<HealthReport, ApplyError> {
        let url = self.backend.url(host, &self.backend.health_path);
        let response = self.client.get(&url).send().await.map_err(|e| transport(host, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApplyError::Status {
                host: host.to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        response.json::<HealthReport>().await.map_err(|e| ApplyError::Decode {
            host: host.to_string(),
            message: e.to_string(),
        })
    }
}

fn transport(host: &str, e: reqwest::Error) -> ApplyError {
    ApplyError::Transport {
        host: host.to_string(),
        message: e.to_string(),
    }
}
