//! Wire message shapes.
//!
//! Every frame is a JSON object dispatched on its `type` tag; requests are
//! further dispatched on `request_type`, pushes on `msg_type`. Payloads stay
//! `serde_json::Value` at this layer and are decoded into typed records by
//! the handler that owns the tag.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One framed IPC message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireFrame {
    /// Client-to-server request
    Request {
        /// Correlation id echoed by the response
        request_id: String,
        /// Handler name
        request_type: String,
        /// Handler payload
        #[serde(default)]
        data: Value,
    },
    /// Server-to-client reply
    Response {
        /// Correlation id of the request being answered
        request_id: String,
        /// Whether the handler succeeded
        success: bool,
        /// Handler result
        #[serde(default)]
        data: Value,
        /// Error message when `success` is false
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Unsolicited server-to-client event
    Push {
        /// Event kind, see [`crate::constants::push`]
        msg_type: String,
        /// Event payload
        data: Value,
    },
    /// Liveness beacon, sent in both directions
    Heartbeat {
        /// Emission time, RFC 3339
        ts: String,
    },
}

impl WireFrame {
    /// Build a request with a fresh correlation id
    #[must_use]
    pub fn request(request_type: impl Into<String>, data: Value) -> Self {
        Self::Request {
            request_id: Uuid::new_v4().simple().to_string(),
            request_type: request_type.into(),
            data,
        }
    }

    /// Build a successful response
    #[must_use]
    pub fn ok_response(request_id: impl Into<String>, data: Value) -> Self {
        Self::Response {
            request_id: request_id.into(),
            success: true,
            data,
            error: None,
        }
    }

    /// Build a failed response
    #[must_use]
    pub fn err_response(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Response {
            request_id: request_id.into(),
            success: false,
            data: Value::Null,
            error: Some(error.into()),
        }
    }

    /// Build a push frame
    #[must_use]
    pub fn push(msg_type: impl Into<String>, data: Value) -> Self {
        Self::Push {
            msg_type: msg_type.into(),
            data,
        }
    }

    /// Build a heartbeat stamped with the current time
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            ts: Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tagged_dispatch() {
        let raw = r#"{"type":"request","request_id":"r1","request_type":"ping","data":{}}"#;
        let frame: WireFrame = serde_json::from_str(raw).unwrap();
        match frame {
            WireFrame::Request {
                request_id,
                request_type,
                ..
            } => {
                assert_eq!(request_id, "r1");
                assert_eq!(request_type, "ping");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_response_error_field_elided_on_success() {
        let frame = WireFrame::ok_response("r2", json!({"pong": true}));
        let raw = serde_json::to_string(&frame).unwrap();
        assert!(!raw.contains("error"));

        let frame = WireFrame::err_response("r2", "unknown request_type");
        let raw = serde_json::to_string(&frame).unwrap();
        assert!(raw.contains("unknown request_type"));
    }

    #[test]
    fn test_request_data_defaults_to_null() {
        let raw = r#"{"type":"request","request_id":"r3","request_type":"get_account"}"#;
        let frame: WireFrame = serde_json::from_str(raw).unwrap();
        match frame {
            WireFrame::Request { data, .. } => assert!(data.is_null()),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
