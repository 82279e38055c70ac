use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Structured session key: one conversation on one channel for one tenant.
///
/// The stable session id is derived from the three parts. The natural id is
/// whatever the channel uses for the conversation (chat ID, room ID, phone
/// number, nick) and may itself contain colons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub tenant_id: String,
    pub channel: String,
    pub natural_id: String,
}

impl SessionKey {
    pub fn new(
        tenant_id: impl Into<String>,
        channel: impl Into<String>,
        natural_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            channel: channel.into(),
            natural_id: natural_id.into(),
        }
    }

    /// Canonical stable id: `{tenant}:{channel}:{natural_id}`.
    pub fn format(&self) -> String {
        format!("{}:{}:{}", self.tenant_id, self.channel, self.natural_id)
    }

    /// Parse a stable id back into its parts. The natural id keeps any
    /// embedded colons.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let tenant_id = parts.next().unwrap_or_default();
        let channel = parts.next().unwrap_or_default();
        let natural_id = parts.next().unwrap_or_default();

        if tenant_id.is_empty() || channel.is_empty() || natural_id.is_empty() {
            return Err(SessionError::InvalidKey(format!(
                "expected tenant:channel:id, got: {s}"
            )));
        }

        Ok(Self {
            tenant_id: tenant_id.to_string(),
            channel: channel.to_string(),
            natural_id: natural_id.to_string(),
        })
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

/// Author of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry in a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A persisted conversation session.
///
/// Created lazily on first reference, mutated under the per-session lock
/// during an agent turn, destroyed only by explicit delete or tenant removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Stable id — the formatted [`SessionKey`].
    pub id: String,
    pub key: SessionKey,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<TranscriptMessage>,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        let now = Utc::now();
        Self {
            id: key.format(),
            key,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: TranscriptMessage) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }
}

/// Listing row returned by the `session.list` surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub tenant_id: String,
    pub channel: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_simple_key() {
        let key = SessionKey::new("default", "telegram", "42");
        let s = key.format();
        assert_eq!(s, "default:telegram:42");
        let parsed = SessionKey::parse(&s).expect("parse failed");
        assert_eq!(parsed, key);
    }

    #[test]
    fn roundtrip_natural_id_with_colons() {
        let key = SessionKey::new("acme", "matrix", "!room:example.org");
        let parsed = SessionKey::parse(&key.format()).expect("parse failed");
        assert_eq!(parsed.natural_id, "!room:example.org");
    }

    #[test]
    fn parse_rejects_missing_parts() {
        assert!(SessionKey::parse("telegram:42").is_err());
        assert!(SessionKey::parse("::").is_err());
    }

    #[test]
    fn push_bumps_updated_at() {
        let mut session = Session::new(SessionKey::new("default", "irc", "#ops"));
        let before = session.updated_at;
        session.push(TranscriptMessage::user("hello"));
        assert!(session.updated_at >= before);
        assert_eq!(session.messages.len(), 1);
    }
}
