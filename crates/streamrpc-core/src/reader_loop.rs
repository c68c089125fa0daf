//! Background reader loop.
//!
//! Owns the inbound half of the stream. Every value read is first offered
//! to the notification dispatcher; whatever it declines is queued on the
//! response correlator. The loop runs until the stream ends or fails, then
//! closes the correlator so no caller is left waiting on a dead stream.

use crate::correlator::{CloseReason, ResponseCorrelator};
use crate::dispatch::{NotificationHandler, Offer};
use crate::reader::ValueReader;
use crate::RpcError;
use std::io::Read;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info};

/// Summary of a finished reader loop.
#[derive(Debug)]
pub struct LoopExit {
    /// Values parsed from the stream.
    pub values_read: u64,
    /// Values consumed as notifications.
    pub dispatched: u64,
    /// Values handed to the correlator.
    pub queued: u64,
    /// What stopped the loop; `StreamEnded` for a clean end.
    pub reason: RpcError,
}

impl LoopExit {
    /// Whether the loop stopped because the peer closed the stream.
    pub fn ended_cleanly(&self) -> bool {
        matches!(self.reason, RpcError::StreamEnded)
    }
}

/// The read → dispatch → enqueue cycle over one inbound stream.
pub struct ReaderLoop<R> {
    reader: ValueReader<R>,
    handler: Option<Arc<NotificationHandler>>,
    correlator: Arc<ResponseCorrelator>,
}

impl<R: Read> ReaderLoop<R> {
    pub fn new(
        reader: ValueReader<R>,
        handler: Option<Arc<NotificationHandler>>,
        correlator: Arc<ResponseCorrelator>,
    ) -> Self {
        Self {
            reader,
            handler,
            correlator,
        }
    }

    /// Run on the current thread until the stream ends or fails.
    pub fn run(mut self) -> LoopExit {
        let mut values_read = 0u64;
        let mut dispatched = 0u64;
        let mut queued = 0u64;

        let stop = loop {
            let value = match self
                .reader
                .assert_readable()
                .and_then(|()| self.reader.next_value())
            {
                Ok(value) => value,
                Err(e) => break e,
            };
            values_read += 1;

            if let Some(reason) = self.correlator.close_reason() {
                break reason.to_error();
            }

            let declined = match &self.handler {
                Some(handler) => match handler.offer(value) {
                    Offer::Consumed => {
                        dispatched += 1;
                        continue;
                    }
                    Offer::Declined(value) => value,
                },
                None => value,
            };

            if let Err(e) = self.correlator.enqueue(declined) {
                break e;
            }
            queued += 1;
        };

        let close = match &stop {
            RpcError::StreamEnded => {
                info!("Inbound stream ended after {} values", values_read);
                CloseReason::StreamEnded
            }
            RpcError::WaitInterrupted { reason } => {
                debug!("Reader loop stopped: {}", reason);
                CloseReason::Shutdown(reason.clone())
            }
            e => {
                error!("Reader loop failed: {}", e);
                CloseReason::ReadFailed(e.to_string())
            }
        };
        self.correlator.close(close);

        LoopExit {
            values_read,
            dispatched,
            queued,
            reason: stop,
        }
    }
}

impl<R: Read + Send + 'static> ReaderLoop<R> {
    /// Run the loop on a dedicated, named OS thread.
    pub fn spawn(self, thread_name: &str) -> std::io::Result<JoinHandle<LoopExit>> {
        debug!("Spawning reader thread '{}'", thread_name);
        std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || self.run())
    }
}
