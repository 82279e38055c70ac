use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Tenant used when a channel or client does not declare one.
pub const DEFAULT_TENANT: &str = "default";

/// Kind of an inbound media attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Audio,
    File,
}

/// A single media attachment carried by an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub kind: MediaKind,
    /// Transport-resolvable URL (or file reference) for the payload.
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// A message received from any channel, normalised to a common shape.
///
/// `session_id` is the channel-natural conversation key (chat ID, room ID,
/// phone number, nick, …) — channels never invent one, with the single
/// exception of the HTTP channel which synthesises `http-<n>` when the
/// caller omits it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundMessage {
    pub session_id: String,
    pub content: String,
    pub channel_name: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default)]
    pub is_mention: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
    /// Transport-specific opaque data (e.g. Teams `service_url`) that must
    /// survive the round-trip into the outbound reply.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl InboundMessage {
    pub fn new(
        channel_name: impl Into<String>,
        session_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            content: content.into(),
            channel_name: channel_name.into(),
            sender_id: sender_id.into(),
            ..Default::default()
        }
    }

    /// True when the message was sent in a group/room context rather than a DM.
    pub fn is_group(&self) -> bool {
        self.group_id.is_some()
    }
}

/// A reply to be delivered on the originating channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub session_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl OutboundMessage {
    /// Build a reply that inherits threading and metadata from the inbound.
    pub fn reply_to(inbound: &InboundMessage, content: impl Into<String>) -> Self {
        Self {
            session_id: inbound.session_id.clone(),
            content: content.into(),
            is_error: false,
            thread_id: inbound.thread_id.clone(),
            reply_to_id: inbound.reply_to_id.clone(),
            metadata: inbound.metadata.clone(),
        }
    }

    /// Build an error reply for the inbound message.
    pub fn error_reply(inbound: &InboundMessage, content: impl Into<String>) -> Self {
        let mut out = Self::reply_to(inbound, content);
        out.is_error = true;
        out
    }

    /// Content as rendered on the wire — error replies carry an "Error: "
    /// prefix (channels may localise the badge).
    pub fn rendered_content(&self) -> String {
        if self.is_error {
            format!("Error: {}", self.content)
        } else {
            self.content.clone()
        }
    }
}

/// Identity attached to an authenticated gateway client.
///
/// An empty role set is treated as implicit admin — tokens minted before
/// roles existed must keep working.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub tenant_id: String,
}

impl ClientInfo {
    pub fn is_implicit_admin(&self) -> bool {
        self.roles.is_empty()
    }
}

/// Per-request context threaded through the router and downstream calls.
///
/// Carries the tenant the work is scoped to and the cancellation token that
/// aborts in-flight work (`chat.abort`, shutdown).
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub tenant_id: String,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(tenant_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            cancel,
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(DEFAULT_TENANT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_inherits_thread_and_metadata() {
        let mut inbound = InboundMessage::new("teams", "conv-1", "u1", "hi");
        inbound.thread_id = Some("t-9".into());
        inbound
            .metadata
            .insert("service_url".into(), "https://smba.example".into());

        let out = OutboundMessage::reply_to(&inbound, "hello");
        assert_eq!(out.session_id, "conv-1");
        assert_eq!(out.thread_id.as_deref(), Some("t-9"));
        assert_eq!(
            out.metadata.get("service_url").map(String::as_str),
            Some("https://smba.example")
        );
        assert!(!out.is_error);
    }

    #[test]
    fn error_reply_renders_prefix() {
        let inbound = InboundMessage::new("irc", "#ops", "alice", "do it");
        let out = OutboundMessage::error_reply(&inbound, "boom");
        assert!(out.is_error);
        assert_eq!(out.rendered_content(), "Error: boom");
    }

    #[test]
    fn empty_roles_is_implicit_admin() {
        let client = ClientInfo {
            name: "legacy".into(),
            roles: vec![],
            tenant_id: DEFAULT_TENANT.into(),
        };
        assert!(client.is_implicit_admin());

        let scoped = ClientInfo {
            name: "dash".into(),
            roles: vec!["viewer".into()],
            tenant_id: "acme".into(),
        };
        assert!(!scoped.is_implicit_admin());
    }
}
