//! Streaming JSON-RPC client over one inbound and one outbound byte stream.
//!
//! Requests are written to the output stream; a background reader thread
//! consumes the input stream, runs notification handlers and hands responses
//! back to the calling threads through the [`ResponseCorrelator`].
//!
//! # Thread Safety
//!
//! The client is `Send + Sync`. Concurrent callers serialize on the output
//! lock while writing and block independently while waiting for their
//! responses. In [`CorrelationMode::Fifo`] a caller receives whichever
//! response arrives next, so concurrent calls may see each other's results.

use crate::config::{ClientConfig, CorrelationMode};
use crate::correlator::{CloseReason, ResponseCorrelator};
use crate::dispatch::NotificationHandler;
use crate::protocol::{id_key, write_message, RpcRequest, RpcResponse};
use crate::reader::ValueReader;
use crate::reader_loop::{LoopExit, ReaderLoop};
use crate::{Result, RpcError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configures and starts a [`StreamingClient`].
pub struct StreamingClientBuilder<R, W> {
    input: R,
    output: W,
    handler: Option<NotificationHandler>,
    config: ClientConfig,
}

impl<R, W> StreamingClientBuilder<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    /// Notification handlers for inbound method calls without an id.
    pub fn handler(mut self, handler: NotificationHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the reader thread and return the client handle.
    pub fn start(self) -> Result<StreamingClient> {
        let config = self.config;
        let correlator = Arc::new(ResponseCorrelator::new(
            config.correlation,
            config.max_pending_responses,
        ));

        let reader = ValueReader::new(self.input).with_peek(config.probe_end_of_stream);
        let reader_loop = ReaderLoop::new(reader, self.handler.map(Arc::new), correlator.clone());
        let reader = reader_loop.spawn(&config.reader_thread_name)?;

        info!(
            "Streaming client started ({} correlation)",
            config.correlation
        );

        Ok(StreamingClient {
            output: Mutex::new(Box::new(self.output)),
            correlator,
            config,
            next_id: AtomicU64::new(1),
            reader: Mutex::new(Some(reader)),
        })
    }
}

/// Handle for issuing calls over a started stream pair.
pub struct StreamingClient {
    output: Mutex<Box<dyn Write + Send>>,
    correlator: Arc<ResponseCorrelator>,
    config: ClientConfig,
    next_id: AtomicU64,
    reader: Mutex<Option<JoinHandle<LoopExit>>>,
}

impl std::fmt::Debug for StreamingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingClient")
            .field("config", &self.config)
            .field("correlator", &self.correlator)
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl StreamingClient {
    /// Start configuring a client over `input` (responses and notifications
    /// from the peer) and `output` (requests to the peer).
    pub fn builder<R, W>(input: R, output: W) -> StreamingClientBuilder<R, W>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        StreamingClientBuilder {
            input,
            output,
            handler: None,
            config: ClientConfig::default(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Call `method` and deserialize the `result` of its response.
    ///
    /// An `error` member in the response becomes [`RpcError::Remote`].
    pub fn invoke<T: DeserializeOwned>(&self, method: &str, params: impl Serialize) -> Result<T> {
        let response = self.invoke_raw(method, params)?;
        decode_response(response)
    }

    /// Call `method` and return the whole response value.
    pub fn invoke_raw(&self, method: &str, params: impl Serialize) -> Result<Value> {
        let params = serde_json::to_value(params)?;
        if let Some(reason) = self.correlator.close_reason() {
            return Err(reason.to_error());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(method, params, id);
        debug!("RPC call: {} (id {})", method, id);

        match self.config.correlation {
            CorrelationMode::ById => {
                let key = id_key(&Value::from(id)).ok_or_else(|| RpcError::InvalidResponse {
                    message: format!("unusable request id {}", id),
                })?;
                self.correlator.expect(&key);
                if let Err(e) = self.send(&request) {
                    self.correlator.forget(&key);
                    return Err(e);
                }
                self.correlator
                    .take_response(&key, self.config.response_timeout)
            }
            CorrelationMode::Fifo => {
                self.send(&request)?;
                self.take_queued(self.config.response_timeout)
            }
        }
    }

    /// Send a notification; no response is expected.
    pub fn notify(&self, method: &str, params: impl Serialize) -> Result<()> {
        let params = serde_json::to_value(params)?;
        debug!("RPC notify: {}", method);
        self.send(&RpcRequest::notification(method, params))
    }

    /// Take the next queued value nobody claimed: stray responses, and
    /// notifications without a handler.
    pub fn take_unsolicited(&self, timeout: Option<Duration>) -> Result<Value> {
        self.take_queued(timeout)
    }

    pub fn correlator(&self) -> &Arc<ResponseCorrelator> {
        &self.correlator
    }

    /// Whether the reader thread is still consuming the input stream.
    pub fn is_reader_running(&self) -> bool {
        self.lock_reader()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Summary of the reader loop once it has finished.
    ///
    /// Returns `None` while it is still running, and after the summary has
    /// been taken once.
    pub fn reader_exit(&self) -> Option<LoopExit> {
        let mut reader = self.lock_reader();
        if !reader.as_ref()?.is_finished() {
            return None;
        }
        match reader.take()?.join() {
            Ok(exit) => Some(exit),
            Err(_) => {
                warn!("Reader thread panicked");
                None
            }
        }
    }

    /// Fail all pending and future calls with `reason`.
    ///
    /// The reader thread stops at the next value it reads; it cannot be
    /// unblocked from a read in progress.
    pub fn shutdown(&self, reason: &str) {
        self.correlator.interrupt(reason);
    }

    fn send(&self, request: &RpcRequest) -> Result<()> {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        write_message(&mut **output, request, self.config.line_delimited)
    }

    fn take_queued(&self, timeout: Option<Duration>) -> Result<Value> {
        match timeout {
            Some(timeout) => self.correlator.take_next_timeout(timeout),
            None => self.correlator.take_next(),
        }
    }

    fn lock_reader(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<LoopExit>>> {
        self.reader.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for StreamingClient {
    fn drop(&mut self) {
        if !self.correlator.is_closed() {
            self.correlator.close(CloseReason::Shutdown("client dropped".to_string()));
        }
    }
}

/// Turn a response value into the call's result.
///
/// A missing `result` is read as `null`.
pub fn decode_response<T: DeserializeOwned>(response: Value) -> Result<T> {
    let response: RpcResponse =
        serde_json::from_value(response).map_err(|e| RpcError::InvalidResponse {
            message: format!("Failed to parse response: {}", e),
        })?;

    if let Some(err) = response.error {
        return Err(RpcError::Remote {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    serde_json::from_value(response.result.unwrap_or(Value::Null)).map_err(|e| {
        RpcError::InvalidResponse {
            message: format!("Unexpected result type: {}", e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_decode_result() {
        let sum: i64 = decode_response(json!({"jsonrpc": "2.0", "id": 1, "result": 5})).unwrap();
        assert_eq!(sum, 5);

        decode_response::<()>(json!({"jsonrpc": "2.0", "id": 2})).unwrap();
    }

    #[test]
    fn test_decode_remote_error() {
        let err = decode_response::<Value>(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "error": {"code": -32601, "message": "Method not found", "data": "nope"}
        }))
        .unwrap_err();

        match err {
            RpcError::Remote { code, message, data } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
                assert_eq!(data, Some(json!("nope")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_non_responses() {
        assert!(matches!(
            decode_response::<Value>(json!(42)),
            Err(RpcError::InvalidResponse { .. })
        ));
        assert!(matches!(
            decode_response::<u32>(json!({"id": 1, "result": "text"})),
            Err(RpcError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_call_after_stream_end_fails_fast() {
        let client = StreamingClient::builder(Cursor::new(Vec::new()), Vec::new())
            .start()
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while client.is_reader_running() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        assert!(matches!(
            client.invoke::<Value>("ping", json!([])),
            Err(RpcError::StreamEnded)
        ));
        let exit = client.reader_exit().unwrap();
        assert!(exit.ended_cleanly());
        assert!(client.reader_exit().is_none());
    }

    #[test]
    fn test_notify_writes_without_id() {
        let (tx, rx) = std::sync::mpsc::channel::<Vec<u8>>();
        struct Capture(std::sync::mpsc::Sender<Vec<u8>>);
        impl Write for Capture {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.send(buf.to_vec()).ok();
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let client = StreamingClient::builder(Cursor::new(Vec::new()), Capture(tx))
            .start()
            .unwrap();
        client.notify("progress", ("build", 40)).unwrap();

        let bytes = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));
        let sent: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            sent,
            json!({"jsonrpc": "2.0", "method": "progress", "params": ["build", 40]})
        );
    }

    #[test]
    fn test_drop_interrupts_correlator() {
        let client = StreamingClient::builder(Cursor::new(Vec::new()), Vec::new())
            .config(ClientConfig::fifo())
            .start()
            .unwrap();
        let correlator = client.correlator().clone();
        drop(client);
        assert!(correlator.is_closed());
    }
}
