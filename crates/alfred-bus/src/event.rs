use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical domain event kinds published on the bus.
///
/// Every stage of the pipeline publishes these; the gateway forwards all of
/// them to connected WS clients as event frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MessageReceived,
    MessageSent,
    AgentError,
    AgentDelegated,
    ToolCallStarted,
    ToolCallCompleted,
    ToolCallFailed,
    ToolApproved,
    ToolDenied,
    LlmCallStarted,
    LlmCallCompleted,
    LlmCallFailed,
    SessionCreated,
    SessionDeleted,
    StreamDelta,
    StreamError,
    ChatAborted,
    ProcessStarted,
    ProcessCompleted,
    ProcessKilled,
    AccessDenied,
    TenantCreated,
    TenantUpdated,
    TenantDeleted,
    MemoryStored,
    MemoryDeleted,
    CronJobCreated,
    CronJobUpdated,
    CronJobDeleted,
    CronRunCompleted,
    ChannelStarted,
    ChannelStopped,
    GdprExport,
    GdprDelete,
}

impl EventType {
    /// Snake_case tag as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MessageReceived => "message_received",
            EventType::MessageSent => "message_sent",
            EventType::AgentError => "agent_error",
            EventType::AgentDelegated => "agent_delegated",
            EventType::ToolCallStarted => "tool_call_started",
            EventType::ToolCallCompleted => "tool_call_completed",
            EventType::ToolCallFailed => "tool_call_failed",
            EventType::ToolApproved => "tool_approved",
            EventType::ToolDenied => "tool_denied",
            EventType::LlmCallStarted => "llm_call_started",
            EventType::LlmCallCompleted => "llm_call_completed",
            EventType::LlmCallFailed => "llm_call_failed",
            EventType::SessionCreated => "session_created",
            EventType::SessionDeleted => "session_deleted",
            EventType::StreamDelta => "stream_delta",
            EventType::StreamError => "stream_error",
            EventType::ChatAborted => "chat_aborted",
            EventType::ProcessStarted => "process_started",
            EventType::ProcessCompleted => "process_completed",
            EventType::ProcessKilled => "process_killed",
            EventType::AccessDenied => "access_denied",
            EventType::TenantCreated => "tenant_created",
            EventType::TenantUpdated => "tenant_updated",
            EventType::TenantDeleted => "tenant_deleted",
            EventType::MemoryStored => "memory_stored",
            EventType::MemoryDeleted => "memory_deleted",
            EventType::CronJobCreated => "cron_job_created",
            EventType::CronJobUpdated => "cron_job_updated",
            EventType::CronJobDeleted => "cron_job_deleted",
            EventType::CronRunCompleted => "cron_run_completed",
            EventType::ChannelStarted => "channel_started",
            EventType::ChannelStopped => "channel_stopped",
            EventType::GdprExport => "gdpr_export",
            EventType::GdprDelete => "gdpr_delete",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single domain event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub payload: Value,
}

impl Event {
    pub fn new(event_type: EventType, payload: Value) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            session_id: None,
            payload,
        }
    }

    pub fn for_session(
        event_type: EventType,
        session_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            session_id: Some(session_id.into()),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_serialises_snake_case() {
        let json = serde_json::to_string(&EventType::ToolCallStarted).unwrap();
        assert_eq!(json, r#""tool_call_started""#);
        assert_eq!(EventType::ToolCallStarted.as_str(), "tool_call_started");
    }

    #[test]
    fn event_wire_shape() {
        let ev = Event::for_session(
            EventType::MessageReceived,
            "telegram:42",
            serde_json::json!({"content": "hi"}),
        );
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "message_received");
        assert_eq!(json["session_id"], "telegram:42");
        assert!(json["timestamp"].is_string());
    }
}
