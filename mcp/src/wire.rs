//! JSON-RPC 2.0 wire types.
//!
//! One JSON object per line, UTF-8, no embedded newlines within a frame. `id` is present on
//! requests and their responses, absent on notifications. Exactly one of `method` (a request or
//! notification) or `result`/`error` (a response) is populated on any given message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "1.0";

// Standard JSON-RPC error codes.
pub const ERR_PARSE: i64 = -32700;
pub const ERR_INVALID_REQUEST: i64 = -32600;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INVALID_PARAMS: i64 = -32602;
pub const ERR_INTERNAL: i64 = -32603;

// Domain error codes.
pub const ERR_SERVER: i64 = -32000;
pub const ERR_TRANSPORT: i64 = -32001;
pub const ERR_INIT: i64 = -32002;
pub const ERR_TOOL_EXEC: i64 = -32003;
pub const ERR_RESOURCE: i64 = -32004;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// An error with transport/server/internal class is retryable; others are terminal, per
    /// the protocol's error classification.
    pub fn is_retryable(&self) -> bool {
        matches!(self.code, ERR_SERVER | ERR_TRANSPORT | ERR_INTERNAL)
    }
}

/// A single JSON-RPC 2.0 message: request, response, or notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcMessage {
    pub fn request(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    pub fn response(id: i64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn error_response(id: i64, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_request(&self) -> bool {
        self.id.is_some() && self.method.is_some()
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }

    pub fn is_response(&self) -> bool {
        self.method.is_none() && (self.result.is_some() || self.error.is_some())
    }

    /// Serialize as a single newline-terminated frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        let mut s = serde_json::to_string(self)?;
        s.push('\n');
        Ok(s)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_a_frame() {
        let msg = JsonRpcMessage::request(7, "tools/list", None);
        let frame = msg.to_frame().unwrap();
        assert!(frame.ends_with('\n'));
        let parsed = JsonRpcMessage::from_line(frame.trim_end()).unwrap();
        assert_eq!(parsed.id, Some(7));
        assert!(parsed.is_request());
    }

    #[test]
    fn notification_has_no_id() {
        let msg = JsonRpcMessage::notification("initialized", None);
        assert!(msg.is_notification());
        assert!(!msg.is_request());
    }

    #[test]
    fn response_classification() {
        let ok = JsonRpcMessage::response(1, serde_json::json!({"ok": true}));
        assert!(ok.is_response());
        let err = JsonRpcMessage::error_response(1, JsonRpcError::new(ERR_METHOD_NOT_FOUND, "no"));
        assert!(err.is_response());
        assert!(!err.error.unwrap().is_retryable());
    }
}
