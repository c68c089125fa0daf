//! Response correlation between the reader loop and calling threads.
//!
//! The reader loop is the only producer; any number of caller threads block
//! here until their response shows up. All state sits behind one mutex.
//!
//! Two modes:
//!
//! - **By id**: callers register the id of their request with
//!   [`expect`](ResponseCorrelator::expect) before sending it and then wait in
//!   [`take_response`](ResponseCorrelator::take_response). Responses whose id
//!   nobody registered land in the FIFO queue as unsolicited values.
//! - **FIFO**: every value goes to the queue and
//!   [`take_next`](ResponseCorrelator::take_next) hands out the head to
//!   whichever caller asks first.
//!
//! # Thread Safety
//!
//! Waiters sleep on a `Condvar`. Closing the correlator wakes all of them;
//! values already queued are still handed out, after that every wait fails
//! with [`RpcError::WaitInterrupted`].

use crate::config::CorrelationMode;
use crate::protocol::message_id_key;
use crate::{Result, RpcError};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Why a correlator stopped accepting responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the inbound stream.
    StreamEnded,
    /// Reading the inbound stream failed.
    ReadFailed(String),
    /// The local side shut the client down.
    Shutdown(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::StreamEnded => write!(f, "inbound stream ended"),
            CloseReason::ReadFailed(message) => write!(f, "inbound stream failed: {}", message),
            CloseReason::Shutdown(reason) => write!(f, "client shut down: {}", reason),
        }
    }
}

impl CloseReason {
    /// The error a new call should fail with once the correlator is closed.
    pub fn to_error(&self) -> RpcError {
        match self {
            CloseReason::StreamEnded => RpcError::StreamEnded,
            CloseReason::ReadFailed(message) => RpcError::StreamRead {
                message: message.clone(),
                source: None,
            },
            CloseReason::Shutdown(reason) => RpcError::WaitInterrupted {
                reason: reason.clone(),
            },
        }
    }
}

#[derive(Default)]
struct State {
    queue: VecDeque<Value>,
    expected: HashSet<String>,
    resolved: HashMap<String, Value>,
    closed: Option<CloseReason>,
}

/// Hands inbound responses to the threads waiting for them.
pub struct ResponseCorrelator {
    mode: CorrelationMode,
    capacity: Option<usize>,
    state: Mutex<State>,
    available: Condvar,
    space: Condvar,
}

impl std::fmt::Debug for ResponseCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCorrelator")
            .field("mode", &self.mode)
            .field("capacity", &self.capacity)
            .field("queued", &self.len())
            .finish()
    }
}

impl ResponseCorrelator {
    /// Create a correlator; `capacity` bounds the FIFO queue.
    pub fn new(mode: CorrelationMode, capacity: Option<usize>) -> Self {
        Self {
            mode,
            capacity: capacity.map(|c| c.max(1)),
            state: Mutex::new(State::default()),
            available: Condvar::new(),
            space: Condvar::new(),
        }
    }

    pub fn mode(&self) -> CorrelationMode {
        self.mode
    }

    /// Register an outstanding request id so its response is kept for it.
    pub fn expect(&self, key: &str) {
        self.lock().expected.insert(key.to_string());
    }

    /// Drop a registration, e.g. when the request could not be sent.
    pub fn forget(&self, key: &str) {
        let mut state = self.lock();
        state.expected.remove(key);
        state.resolved.remove(key);
    }

    /// Add an inbound value.
    ///
    /// In by-id mode a response to a registered id is parked for its caller;
    /// everything else is appended to the FIFO queue. Fails once the
    /// correlator is closed.
    ///
    /// With a capacity set, a full queue blocks the caller in FIFO mode. In
    /// by-id mode the queue only holds unsolicited values and never blocks:
    /// the oldest one is discarded to make room.
    pub fn enqueue(&self, value: Value) -> Result<()> {
        let mut state = self.lock();

        if self.mode == CorrelationMode::ById {
            if let Some(key) = message_id_key(&value) {
                if state.expected.contains(&key) && !state.resolved.contains_key(&key) {
                    trace!("Resolved response for id {}", key);
                    state.resolved.insert(key, value);
                    drop(state);
                    self.available.notify_all();
                    return Ok(());
                }
            }
        }

        if let Some(capacity) = self.capacity {
            match self.mode {
                CorrelationMode::Fifo => {
                    while state.queue.len() >= capacity && state.closed.is_none() {
                        debug!("Response queue full ({} values), pausing reader", capacity);
                        state = self
                            .space
                            .wait(state)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                }
                CorrelationMode::ById => {
                    while state.queue.len() >= capacity && state.closed.is_none() {
                        if let Some(dropped) = state.queue.pop_front() {
                            warn!("Unsolicited queue full, discarding oldest value: {}", dropped);
                        }
                    }
                }
            }
        }
        if let Some(reason) = &state.closed {
            return Err(RpcError::WaitInterrupted {
                reason: reason.to_string(),
            });
        }

        state.queue.push_back(value);
        drop(state);
        match self.mode {
            CorrelationMode::Fifo => self.available.notify_one(),
            CorrelationMode::ById => self.available.notify_all(),
        }
        Ok(())
    }

    /// Block until the queue is non-empty and pop its head.
    pub fn take_next(&self) -> Result<Value> {
        self.wait_for(None, |state| state.queue.pop_front(), |_| {})
    }

    /// Like [`take_next`](Self::take_next), giving up after `timeout`.
    pub fn take_next_timeout(&self, timeout: Duration) -> Result<Value> {
        self.wait_for(Some(timeout), |state| state.queue.pop_front(), |_| {})
    }

    /// Block until the response for a registered id arrives.
    ///
    /// The registration is dropped when this returns, whatever the outcome;
    /// a response arriving after a timeout is queued as unsolicited.
    pub fn take_response(&self, key: &str, timeout: Option<Duration>) -> Result<Value> {
        self.wait_for(
            timeout,
            |state| {
                let value = state.resolved.remove(key)?;
                state.expected.remove(key);
                Some(value)
            },
            |state| {
                state.expected.remove(key);
            },
        )
    }

    /// Stop accepting values and wake every waiter.
    ///
    /// The first reason sticks; later calls are ignored.
    pub fn close(&self, reason: CloseReason) {
        let mut state = self.lock();
        if state.closed.is_none() {
            debug!("Closing response correlator: {}", reason);
            if !state.expected.is_empty() {
                warn!("{} call(s) still waiting for a response", state.expected.len());
            }
            state.closed = Some(reason);
        }
        drop(state);
        self.available.notify_all();
        self.space.notify_all();
    }

    /// Close on behalf of the local side.
    pub fn interrupt(&self, reason: impl Into<String>) {
        self.close(CloseReason::Shutdown(reason.into()));
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.lock().closed.clone()
    }

    /// Number of values in the FIFO queue.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of registered ids still waiting for a response.
    pub fn outstanding(&self) -> usize {
        self.lock().expected.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until `take` yields a value. On timeout or close, `give_up` runs
    /// under the same guard that saw `take` fail.
    fn wait_for<T>(
        &self,
        timeout: Option<Duration>,
        mut take: impl FnMut(&mut State) -> Option<T>,
        give_up: impl FnOnce(&mut State),
    ) -> Result<T> {
        let deadline = timeout.map(|limit| (limit, Instant::now() + limit));
        let mut state = self.lock();
        loop {
            if let Some(value) = take(&mut *state) {
                drop(state);
                self.space.notify_one();
                return Ok(value);
            }
            if let Some(reason) = &state.closed {
                let reason = reason.to_string();
                give_up(&mut *state);
                return Err(RpcError::WaitInterrupted { reason });
            }

            state = match deadline {
                None => self
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some((limit, deadline)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        give_up(&mut *state);
                        return Err(RpcError::Timeout(limit));
                    }
                    self.available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;

    fn fifo() -> Arc<ResponseCorrelator> {
        Arc::new(ResponseCorrelator::new(CorrelationMode::Fifo, None))
    }

    #[test]
    fn test_fifo_preserves_arrival_order() {
        let correlator = fifo();
        for n in 0..10 {
            correlator.enqueue(json!({"id": n, "result": n * 2})).unwrap();
        }
        assert_eq!(correlator.len(), 10);
        for n in 0..10 {
            assert_eq!(correlator.take_next().unwrap()["id"], n);
        }
        assert!(correlator.is_empty());
    }

    #[test]
    fn test_take_next_blocks_until_enqueue() {
        let correlator = fifo();
        let waiter = {
            let correlator = correlator.clone();
            thread::spawn(move || correlator.take_next())
        };

        thread::sleep(Duration::from_millis(50));
        correlator.enqueue(json!({"id": 1, "result": "pong"})).unwrap();

        let value = waiter.join().unwrap().unwrap();
        assert_eq!(value, json!({"id": 1, "result": "pong"}));
    }

    #[test]
    fn test_by_id_routes_to_registered_caller() {
        let correlator = ResponseCorrelator::new(CorrelationMode::ById, None);
        correlator.expect("n:1");
        correlator.expect("n:2");

        correlator.enqueue(json!({"id": 2, "result": "second"})).unwrap();
        correlator.enqueue(json!({"id": 1, "result": "first"})).unwrap();
        assert!(correlator.is_empty());

        assert_eq!(correlator.take_response("n:1", None).unwrap()["result"], "first");
        assert_eq!(correlator.take_response("n:2", None).unwrap()["result"], "second");
        assert_eq!(correlator.outstanding(), 0);
    }

    #[test]
    fn test_by_id_unregistered_goes_to_queue() {
        let correlator = ResponseCorrelator::new(CorrelationMode::ById, None);
        correlator.expect("n:1");

        correlator.enqueue(json!({"id": 9, "result": "stray"})).unwrap();
        correlator.enqueue(json!({"method": "note", "params": []})).unwrap();
        correlator.enqueue(json!({"id": 1, "result": "mine"})).unwrap();
        correlator.enqueue(json!({"id": 1, "result": "duplicate"})).unwrap();

        assert_eq!(correlator.len(), 3);
        assert_eq!(correlator.take_response("n:1", None).unwrap()["result"], "mine");
        assert_eq!(correlator.take_next().unwrap()["result"], "stray");
        assert_eq!(correlator.take_next().unwrap()["method"], "note");
        assert_eq!(correlator.take_next().unwrap()["result"], "duplicate");
    }

    #[test]
    fn test_fifo_ignores_ids() {
        let correlator = fifo();
        correlator.expect("n:1");
        correlator.enqueue(json!({"id": 1, "result": true})).unwrap();
        assert_eq!(correlator.len(), 1);
    }

    #[test]
    fn test_close_wakes_waiters() {
        let correlator = fifo();
        let waiter = {
            let correlator = correlator.clone();
            thread::spawn(move || correlator.take_next())
        };

        thread::sleep(Duration::from_millis(50));
        correlator.close(CloseReason::StreamEnded);

        match waiter.join().unwrap() {
            Err(RpcError::WaitInterrupted { reason }) => assert!(reason.contains("ended")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(correlator.enqueue(json!(1)).is_err());
    }

    #[test]
    fn test_queued_values_survive_close() {
        let correlator = fifo();
        correlator.enqueue(json!("last words")).unwrap();
        correlator.close(CloseReason::Shutdown("test".into()));
        correlator.close(CloseReason::StreamEnded);

        assert_eq!(correlator.take_next().unwrap(), json!("last words"));
        assert!(correlator.take_next().is_err());
        assert_eq!(
            correlator.close_reason(),
            Some(CloseReason::Shutdown("test".into()))
        );
    }

    #[test]
    fn test_take_next_timeout() {
        let correlator = fifo();
        match correlator.take_next_timeout(Duration::from_millis(30)) {
            Err(RpcError::Timeout(limit)) => assert_eq!(limit, Duration::from_millis(30)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_late_response_after_timeout_is_unsolicited() {
        let correlator = ResponseCorrelator::new(CorrelationMode::ById, None);
        correlator.expect("s:abc");
        assert!(correlator
            .take_response("s:abc", Some(Duration::from_millis(20)))
            .is_err());
        assert_eq!(correlator.outstanding(), 0);

        correlator.enqueue(json!({"id": "abc", "result": 1})).unwrap();
        assert_eq!(correlator.len(), 1);
    }

    #[test]
    fn test_bounded_queue_applies_back_pressure() {
        let correlator = Arc::new(ResponseCorrelator::new(CorrelationMode::Fifo, Some(1)));
        correlator.enqueue(json!(1)).unwrap();

        let (tx, rx) = mpsc::channel();
        let producer = {
            let correlator = correlator.clone();
            thread::spawn(move || {
                correlator.enqueue(json!(2)).unwrap();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(correlator.take_next().unwrap(), json!(1));
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        producer.join().unwrap();
        assert_eq!(correlator.take_next().unwrap(), json!(2));
    }

    #[test]
    fn test_response_racing_a_timeout_is_never_lost() {
        use std::sync::Barrier;

        for round in 0..2000u64 {
            let correlator = Arc::new(ResponseCorrelator::new(CorrelationMode::ById, None));
            let key = format!("n:{round}");
            correlator.expect(&key);

            let barrier = Arc::new(Barrier::new(2));
            let producer = {
                let correlator = correlator.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    correlator.enqueue(json!({"id": round, "result": "ok"})).unwrap();
                })
            };

            barrier.wait();
            let taken = correlator.take_response(&key, Some(Duration::from_micros(1)));
            producer.join().unwrap();

            match taken {
                Ok(value) => {
                    assert_eq!(value["id"], round);
                    assert!(correlator.is_empty());
                }
                Err(_) => {
                    let late = correlator.take_next_timeout(Duration::from_secs(1)).unwrap();
                    assert_eq!(late["id"], round);
                }
            }
            assert_eq!(correlator.outstanding(), 0);
        }
    }

    #[test]
    fn test_by_id_bound_discards_oldest_unsolicited() {
        let correlator = ResponseCorrelator::new(CorrelationMode::ById, Some(2));
        correlator.expect("n:7");

        for n in 0..4 {
            correlator.enqueue(json!({"method": "note", "params": [n]})).unwrap();
        }
        correlator.enqueue(json!({"id": 7, "result": "mine"})).unwrap();

        assert_eq!(correlator.len(), 2);
        assert_eq!(correlator.take_response("n:7", None).unwrap()["result"], "mine");
        assert_eq!(correlator.take_next().unwrap()["params"], json!([2]));
        assert_eq!(correlator.take_next().unwrap()["params"], json!([3]));
    }

    #[test]
    fn test_close_releases_blocked_producer() {
        let correlator = Arc::new(ResponseCorrelator::new(CorrelationMode::Fifo, Some(1)));
        correlator.enqueue(json!(1)).unwrap();

        let producer = {
            let correlator = correlator.clone();
            thread::spawn(move || correlator.enqueue(json!(2)))
        };
        thread::sleep(Duration::from_millis(50));
        correlator.close(CloseReason::Shutdown("done".into()));

        assert!(producer.join().unwrap().is_err());
    }

    #[test]
    fn test_concurrent_fifo_waiters_each_get_one_value() {
        let correlator = fifo();
        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let correlator = correlator.clone();
                thread::spawn(move || correlator.take_next().unwrap())
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        correlator.enqueue(json!("a")).unwrap();
        correlator.enqueue(json!("b")).unwrap();

        let mut got: Vec<Value> = waiters.into_iter().map(|w| w.join().unwrap()).collect();
        got.sort_by_key(|v| v.to_string());
        assert_eq!(got, vec![json!("a"), json!("b")]);
    }
}
