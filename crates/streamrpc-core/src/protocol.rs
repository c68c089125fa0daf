//! JSON-RPC wire types and message shapes.
//!
//! Messages travel as bare JSON values, one after another, with no length
//! prefix. Outbound messages may be followed by a newline; the inbound reader
//! treats any whitespace between values as a separator.
//!
//! ```text
//! {"jsonrpc":"2.0","method":"ping","params":[],"id":1}
//! {"jsonrpc":"2.0","method":"progress","params":[42]}
//! ```

use crate::config::TransportConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;

pub const ID: &str = "id";
pub const METHOD: &str = "method";
pub const PARAMS: &str = "params";
pub const RESULT: &str = "result";
pub const ERROR: &str = "error";

/// Outbound JSON-RPC 2.0 request or notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl RpcRequest {
    /// Create a request that expects a response.
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: TransportConfig::JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Some(params),
            id: Some(Value::Number(id.into())),
        }
    }

    /// Create a notification (no id, no response expected).
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: TransportConfig::JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Some(params),
            id: None,
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
    #[serde(default)]
    pub id: Option<Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: Some(TransportConfig::JSONRPC_VERSION.to_string()),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: Some(TransportConfig::JSONRPC_VERSION.to_string()),
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Structural shape of an inbound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Carries both a method and an id.
    Request,
    /// Carries an id and no method.
    Response,
    /// Carries a method and no id.
    Notification,
    /// Anything else (non-objects, objects with neither field).
    Unknown,
}

impl MessageKind {
    /// Classify a value by the presence of its `id` and `method` members.
    pub fn of(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return MessageKind::Unknown;
        };
        match (object.contains_key(ID), object.contains_key(METHOD)) {
            (true, true) => MessageKind::Request,
            (true, false) => MessageKind::Response,
            (false, true) => MessageKind::Notification,
            (false, false) => MessageKind::Unknown,
        }
    }
}

/// Canonical key for a correlation id.
///
/// Only string and number ids can be correlated; `null` and structured ids
/// yield `None`.
pub fn id_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(format!("s:{s}")),
        Value::Number(n) => Some(format!("n:{n}")),
        _ => None,
    }
}

/// Correlation key of an inbound message, if it carries a usable id.
pub fn message_id_key(message: &Value) -> Option<String> {
    message.get(ID).and_then(id_key)
}

/// Serialize one message onto the outbound stream and flush it.
pub fn write_message<W: Write + ?Sized, T: Serialize>(
    writer: &mut W,
    message: &T,
    line_delimited: bool,
) -> Result<()> {
    let mut payload = serde_json::to_vec(message)?;
    if line_delimited {
        payload.push(b'\n');
    }
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}
