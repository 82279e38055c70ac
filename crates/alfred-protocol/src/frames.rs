use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminator of the single JSON envelope on the WS wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Request,
    Response,
    Event,
}

/// One WebSocket envelope.
///
/// Wire examples:
/// - `{ "type":"request", "id":1, "method":"chat.send", "payload":{...} }`
/// - `{ "type":"response", "id":1, "payload":{...}, "error":"" }`
/// - `{ "type":"event", "payload":{...} }`
///
/// `id` is present on request/response only, `method` on requests only.
/// Responses always carry `error` — empty on success, the error string on
/// failure (with `payload` absent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Frame {
    pub fn request(id: u64, method: impl Into<String>, payload: Value) -> Self {
        Self {
            frame_type: FrameType::Request,
            id: Some(id),
            method: Some(method.into()),
            payload: Some(payload),
            error: None,
        }
    }

    /// Successful response — `error` is the empty string by convention.
    pub fn response(id: u64, payload: Value) -> Self {
        Self {
            frame_type: FrameType::Response,
            id: Some(id),
            method: None,
            payload: Some(payload),
            error: Some(String::new()),
        }
    }

    /// Failed response — no payload, non-empty error string.
    pub fn error_response(id: u64, error: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Response,
            id: Some(id),
            method: None,
            payload: None,
            error: Some(error.into()),
        }
    }

    pub fn event(payload: Value) -> Self {
        Self {
            frame_type: FrameType::Event,
            id: None,
            method: None,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn is_request(&self) -> bool {
        self.frame_type == FrameType::Request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_response_has_empty_error_string() {
        let frame = Frame::response(1, serde_json::json!({"msg": "hi"}));
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""error":"""#));
        assert!(json.contains(r#""id":1"#));
    }

    #[test]
    fn error_response_omits_payload() {
        let frame = Frame::error_response(7, "method not found: nope");
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("payload"));
        assert!(json.contains("method not found"));
    }
}
