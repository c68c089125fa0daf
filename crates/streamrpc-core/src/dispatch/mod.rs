//! Notification dispatch.
//!
//! Decides whether an inbound value is a notification this side has a
//! handler for, and if so hands the handler invocation to an [`Executor`].
//! Anything it declines is given back to the caller untouched so it can be
//! queued as a response.
//!
//! # Architecture
//!
//! - **Handler table**: method name → typed handler, built once by
//!   [`NotificationHandlerBuilder`]
//! - **Coercion**: positional JSON params → declared argument types
//! - **Executor**: caller-owned facility that actually runs the handlers

pub mod executor;
pub mod handler;

pub use executor::{Executor, Task, ThreadExecutor, TokioExecutor};
pub use handler::{BoundCall, CoerceError, HandlerOutcome, NotificationFn};

use crate::protocol::{ID, METHOD, PARAMS};
use crate::RpcError;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Outcome of offering a value to the dispatcher.
#[derive(Debug)]
pub enum Offer {
    /// The value was a notification and has been submitted for handling.
    Consumed,
    /// Not a dispatchable notification; the value is handed back.
    Declined(Value),
}

impl Offer {
    pub fn is_consumed(&self) -> bool {
        matches!(self, Offer::Consumed)
    }
}

type BindFn = Box<dyn Fn(Vec<Value>) -> Result<BoundCall, CoerceError> + Send + Sync>;
type FallbackFn = Arc<dyn Fn(&str, Vec<Value>) -> Result<(), String> + Send + Sync>;

struct Binding {
    arity: usize,
    bind: BindFn,
}

enum Target<'a> {
    Bound(&'a Binding),
    Fallback(&'a FallbackFn),
}

/// Table of notification handlers plus the executor they run on.
pub struct NotificationHandler {
    bindings: HashMap<String, Binding>,
    fallback: Option<FallbackFn>,
    executor: Arc<dyn Executor>,
}

impl std::fmt::Debug for NotificationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHandler")
            .field("methods", &self.bindings.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl NotificationHandler {
    /// Start building a handler table whose handlers run on `executor`.
    pub fn builder(executor: impl Executor) -> NotificationHandlerBuilder {
        Self::builder_shared(Arc::new(executor))
    }

    /// Like [`builder`](Self::builder) for an executor shared with other owners.
    pub fn builder_shared(executor: Arc<dyn Executor>) -> NotificationHandlerBuilder {
        NotificationHandlerBuilder {
            bindings: HashMap::new(),
            fallback: None,
            executor,
        }
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Whether a handler is registered under `method`.
    pub fn handles(&self, method: &str) -> bool {
        self.bindings.contains_key(method)
    }

    /// Registered method names, in no particular order.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// Offer an inbound value for dispatch.
    ///
    /// Declines values that carry an `id`, lack a non-empty string `method`,
    /// lack an array `params`, name an unregistered method (with no
    /// fallback), or supply fewer params than the handler declares.
    /// Accepted notifications are coerced and submitted as a single task;
    /// coercion and handler failures are logged, never returned.
    pub fn offer(&self, mut message: Value) -> Offer {
        let Some(target) = self.resolve(&message) else {
            return Offer::Declined(message);
        };

        let method = message
            .get(METHOD)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let params = match message.get_mut(PARAMS).map(Value::take) {
            Some(Value::Array(params)) => params,
            _ => Vec::new(),
        };

        match target {
            Target::Bound(binding) => match (binding.bind)(params) {
                Ok(call) => self.submit(method, call),
                Err(e) => {
                    let err = RpcError::Dispatch {
                        method,
                        message: e.to_string(),
                    };
                    warn!("{}", err);
                }
            },
            Target::Fallback(fallback) => {
                let fallback = Arc::clone(fallback);
                let name = method.clone();
                self.submit(method, Box::new(move || fallback(&name, params)));
            }
        }
        Offer::Consumed
    }

    fn resolve(&self, message: &Value) -> Option<Target<'_>> {
        let object = message.as_object()?;
        if object.contains_key(ID) {
            return None;
        }

        let method = object.get(METHOD)?.as_str()?;
        let params = object.get(PARAMS)?.as_array()?;
        if method.is_empty() {
            return None;
        }

        match self.bindings.get(method) {
            Some(binding) if params.len() >= binding.arity => Some(Target::Bound(binding)),
            Some(binding) => {
                warn!(
                    "Notification '{}' carries {} params, handler expects {}",
                    method,
                    params.len(),
                    binding.arity
                );
                None
            }
            None => match &self.fallback {
                Some(fallback) => Some(Target::Fallback(fallback)),
                None => {
                    trace!("No handler for notification '{}'", method);
                    None
                }
            },
        }
    }

    fn submit(&self, method: String, call: BoundCall) {
        debug!("Dispatching notification '{}'", method);
        self.executor
            .execute(Box::new(move || run_handler(&method, call)));
    }
}

fn run_handler(method: &str, call: BoundCall) {
    let message = match std::panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => return,
        Ok(Err(message)) => message,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            format!("handler panicked: {}", detail)
        }
    };
    let err = RpcError::Dispatch {
        method: method.to_string(),
        message,
    };
    error!("{}", err);
}

/// Builder for [`NotificationHandler`].
pub struct NotificationHandlerBuilder {
    bindings: HashMap<String, Binding>,
    fallback: Option<FallbackFn>,
    executor: Arc<dyn Executor>,
}

impl NotificationHandlerBuilder {
    /// Register `handler` for notifications named `name`.
    ///
    /// The first registration of a name wins; later ones are ignored.
    pub fn method<Args, F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: NotificationFn<Args>,
    {
        let name = name.into();
        if name.is_empty() {
            warn!("Ignoring notification handler registered with an empty name");
            return self;
        }
        if self.bindings.contains_key(&name) {
            warn!("Notification handler '{}' already registered, keeping the first", name);
            return self;
        }

        let handler = Arc::new(handler);
        self.bindings.insert(
            name,
            Binding {
                arity: F::ARITY,
                bind: Box::new(move |params: Vec<Value>| F::bind_params(&handler, params)),
            },
        );
        self
    }

    /// Receive notifications that have no registered handler.
    ///
    /// Without a fallback such notifications are declined and end up in the
    /// response queue.
    pub fn fallback<F, R>(mut self, handler: F) -> Self
    where
        F: Fn(&str, Vec<Value>) -> R + Send + Sync + 'static,
        R: HandlerOutcome,
    {
        let fallback: FallbackFn = Arc::new(move |method: &str, params: Vec<Value>| {
            handler(method, params).into_outcome()
        });
        self.fallback = Some(fallback);
        self
    }

    pub fn build(self) -> NotificationHandler {
        NotificationHandler {
            bindings: self.bindings,
            fallback: self.fallback,
            executor: self.executor,
        }
    }
}
