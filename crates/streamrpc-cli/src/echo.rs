//! Echo peer: the other end of a streaming client, served over any stream pair.
//!
//! Every request is answered with its own params as the result. A request
//! for the method `fail` is answered with an internal error instead.
//! Notifications and stray responses are ignored.

use serde_json::{json, Value};
use std::io::{Read, Write};
use streamrpc_core::protocol::{write_message, MessageKind, RpcResponse, ID, METHOD, PARAMS};
use streamrpc_core::{RpcError, ValueReader};
use tracing::{debug, info};

/// Method name the echo peer answers with an error.
pub const FAIL_METHOD: &str = "fail";
/// Notification emitted before each reply when ticking is enabled.
pub const TICK_METHOD: &str = "tick";

/// Counters for a finished echo session.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EchoStats {
    pub requests: u64,
    pub ignored: u64,
}

/// Serve requests from `input` until it ends.
pub fn serve<R: Read, W: Write>(input: R, mut output: W, tick: bool) -> anyhow::Result<EchoStats> {
    let mut reader = ValueReader::new(input);
    let mut stats = EchoStats::default();

    loop {
        let message = match reader.next_value() {
            Ok(message) => message,
            Err(RpcError::StreamEnded) => break,
            Err(e) => return Err(e.into()),
        };

        if MessageKind::of(&message) != MessageKind::Request {
            debug!("Ignoring inbound value without a request shape");
            stats.ignored += 1;
            continue;
        }

        stats.requests += 1;
        if tick {
            let tick = json!({"jsonrpc": "2.0", "method": TICK_METHOD, "params": [stats.requests]});
            write_message(&mut output, &tick, true)?;
        }
        write_message(&mut output, &reply_to(&message), true)?;
    }

    info!(
        "Echo peer finished: {} requests, {} ignored",
        stats.requests, stats.ignored
    );
    Ok(stats)
}

/// The response the echo peer sends for `request`.
pub fn reply_to(request: &Value) -> RpcResponse {
    let id = request.get(ID).cloned();
    let method = request.get(METHOD).and_then(Value::as_str).unwrap_or_default();

    if method == FAIL_METHOD {
        let err = RpcError::Io {
            message: "requested failure".to_string(),
            source: None,
        };
        return RpcResponse::error(id, err.to_rpc_error_code(), err.to_string());
    }

    let params = request.get(PARAMS).cloned().unwrap_or(Value::Null);
    RpcResponse::success(id, params)
}
