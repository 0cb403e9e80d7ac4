use serde::{Deserialize, Serialize};
use std::fmt;

/// Type de bot synthétique ; chaque type a son propre pool d'allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotKind {
    Viewer,
    Chatter,
}

impl BotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotKind::Viewer => "viewer",
            BotKind::Chatter => "chatter",
        }
    }

    /// Champ du body de retrait attendu par le bot-server.
    pub fn count_field(&self) -> &'static str {
        match self {
            BotKind::Viewer => "viewer_count",
            BotKind::Chatter => "chatter_count",
        }
    }
}

impl fmt::Display for BotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifie un stream boosté : (user, URL du stream, type de bot).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    pub user_id: String,
    pub stream_url: String,
    pub kind: BotKind,
}

impl StreamKey {
    pub fn new(user_id: impl Into<String>, stream_url: impl Into<String>, kind: BotKind) -> Self {
        Self {
            user_id: user_id.into(),
            stream_url: stream_url.into(),
            kind,
        }
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(crate::BoostError::InvalidRequest("user_id is empty".into()));
        }
        if self.stream_url.trim().is_empty() {
            return Err(crate::BoostError::InvalidRequest("stream_url is empty".into()));
        }
        Ok(())
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.user_id, self.stream_url, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serde_is_lowercase() {
        let json = serde_json::to_string(&BotKind::Chatter).unwrap();
        assert_eq!(json, "\"chatter\"");
        let kind: BotKind = serde_json::from_str("\"viewer\"").unwrap();
        assert_eq!(kind, BotKind::Viewer);
    }

    #[test]
    fn test_stream_key_validation() {
        assert!(StreamKey::new("u1", "https://twitch.tv/foo", BotKind::Viewer).validate().is_ok());
        assert!(StreamKey::new("", "https://twitch.tv/foo", BotKind::Viewer).validate().is_err());
        assert!(StreamKey::new("u1", "  ", BotKind::Chatter).validate().is_err());
    }
}
