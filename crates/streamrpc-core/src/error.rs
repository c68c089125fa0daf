//! Error types for the stream transport.
//!
//! Every failure the transport can surface lives in [`RpcError`]. Read-side
//! failures terminate the background reader loop, dispatch failures are only
//! ever logged, and the remaining variants are what a caller of
//! [`StreamingClient::invoke`](crate::StreamingClient::invoke) observes.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the stream transport.
#[derive(Debug, Error)]
pub enum RpcError {
    // Inbound stream errors
    #[error("Stream ended")]
    StreamEnded,

    #[error("Stream read error: {message}")]
    StreamRead {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // Correlation errors
    #[error("Wait for response interrupted: {reason}")]
    WaitInterrupted { reason: String },

    #[error("Timed out after {0:?} waiting for a response")]
    Timeout(Duration),

    // Notification dispatch errors (reported, never propagated to the loop)
    #[error("Dispatch of notification '{method}' failed: {message}")]
    Dispatch { method: String, message: String },

    // Peer-reported errors
    #[error("Remote error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    // Outbound / serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl RpcError {
    /// Wrap an I/O failure that happened while reading the inbound stream.
    pub fn stream_read(err: std::io::Error) -> Self {
        RpcError::StreamRead {
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Map a codec failure on the inbound stream.
    ///
    /// I/O failures keep their source; syntax errors and truncated values are
    /// reported with the codec's message.
    pub fn from_codec(err: serde_json::Error) -> Self {
        if err.is_io() {
            let message = err.to_string();
            RpcError::StreamRead {
                message,
                source: Some(err.into()),
            }
        } else {
            RpcError::StreamRead {
                message: err.to_string(),
                source: None,
            }
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error
    /// - -32600: Invalid Request
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Remote errors keep the code the peer sent. Transport failures use the
    /// application range:
    /// - -32000: Stream ended or unreadable
    /// - -32001: Wait interrupted
    /// - -32002: Timeout
    pub fn to_rpc_error_code(&self) -> i64 {
        match self {
            RpcError::Remote { code, .. } => *code,
            RpcError::Json { .. } => -32700,
            RpcError::InvalidResponse { .. } => -32600,
            RpcError::Dispatch { .. } => -32602,
            RpcError::StreamEnded | RpcError::StreamRead { .. } => -32000,
            RpcError::WaitInterrupted { .. } => -32001,
            RpcError::Timeout(_) => -32002,
            RpcError::Io { .. } => -32603,
        }
    }

    /// Whether this error means the inbound side is gone for good.
    pub fn is_stream_closed(&self) -> bool {
        matches!(
            self,
            RpcError::StreamEnded | RpcError::StreamRead { .. } | RpcError::WaitInterrupted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RpcError::Remote {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert_eq!(err.to_string(), "Remote error -32601: Method not found");
        assert_eq!(RpcError::StreamEnded.to_string(), "Stream ended");
    }

    #[test]
    fn test_rpc_error_codes() {
        let remote = RpcError::Remote {
            code: -32099,
            message: "custom".into(),
            data: None,
        };
        assert_eq!(remote.to_rpc_error_code(), -32099);
        assert_eq!(RpcError::StreamEnded.to_rpc_error_code(), -32000);
        assert_eq!(
            RpcError::Timeout(Duration::from_secs(1)).to_rpc_error_code(),
            -32002
        );
    }

    #[test]
    fn test_codec_syntax_error_has_no_io_source() {
        let err = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        match RpcError::from_codec(err) {
            RpcError::StreamRead { source, .. } => assert!(source.is_none()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_stream_closed_classification() {
        assert!(RpcError::StreamEnded.is_stream_closed());
        assert!(RpcError::WaitInterrupted {
            reason: "shutdown".into()
        }
        .is_stream_closed());
        assert!(!RpcError::Timeout(Duration::from_millis(5)).is_stream_closed());
    }
}
