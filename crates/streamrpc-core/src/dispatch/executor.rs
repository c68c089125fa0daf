//! Execution facilities for notification handlers.
//!
//! The dispatcher never runs handlers on the reader thread itself and never
//! manages threads of its own: it hands every invocation to an [`Executor`]
//! supplied by whoever registered the handlers.

use crate::config::TransportConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

/// A unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Accepts tasks and runs them, now or later, on some thread.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, task: Task);
}

impl<F> Executor for F
where
    F: Fn(Task) + Send + Sync + 'static,
{
    fn execute(&self, task: Task) {
        self(task)
    }
}

/// Runs each task on a freshly spawned, named OS thread.
#[derive(Debug)]
pub struct ThreadExecutor {
    name: String,
    spawned: AtomicU64,
}

impl ThreadExecutor {
    pub fn new() -> Self {
        Self::named(TransportConfig::NOTIFICATION_THREAD_NAME)
    }

    /// Threads are named `{prefix}-{n}`.
    pub fn named(prefix: impl Into<String>) -> Self {
        Self {
            name: prefix.into(),
            spawned: AtomicU64::new(0),
        }
    }

    /// Number of tasks handed to a thread so far.
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) {
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        let spawn = std::thread::Builder::new()
            .name(format!("{}-{}", self.name, n))
            .spawn(task);
        if let Err(e) = spawn {
            error!("Failed to spawn notification thread: {}", e);
        }
    }
}

/// Runs tasks on a tokio runtime's blocking pool.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
}

impl TokioExecutor {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Executor for the runtime the caller is running inside, if any.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Task) {
        // Handlers are synchronous and may block; keep them off the async workers.
        drop(self.handle.spawn_blocking(task));
    }
}
