//! Typed notification handler functions.
//!
//! Any `Fn(A1, .., An)` whose arguments implement `DeserializeOwned` can be
//! registered as a notification handler. The positional JSON params are
//! coerced into the declared argument types when a notification arrives.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// A handler invocation with its arguments already coerced.
pub type BoundCall = Box<dyn FnOnce() -> Result<(), String> + Send + 'static>;

/// Failure to coerce one positional param into its declared type.
#[derive(Debug)]
pub struct CoerceError {
    pub index: usize,
    pub message: String,
}

impl fmt::Display for CoerceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "param {}: {}", self.index, self.message)
    }
}

impl std::error::Error for CoerceError {}

/// Return types a notification handler may have.
pub trait HandlerOutcome {
    fn into_outcome(self) -> Result<(), String>;
}

impl HandlerOutcome for () {
    fn into_outcome(self) -> Result<(), String> {
        Ok(())
    }
}

impl<E: fmt::Display> HandlerOutcome for Result<(), E> {
    fn into_outcome(self) -> Result<(), String> {
        self.map_err(|e| format!("{e:#}"))
    }
}

/// A function usable as a notification handler.
///
/// `Args` is the tuple of argument types; it only exists to keep the
/// per-arity impls apart and is inferred at registration.
pub trait NotificationFn<Args>: Send + Sync + Sized + 'static {
    /// Number of params the handler declares.
    const ARITY: usize;

    /// Coerce `params` (at least `ARITY` of them) and capture the call.
    fn bind_params(this: &Arc<Self>, params: Vec<Value>) -> Result<BoundCall, CoerceError>;
}

fn coerce<T: DeserializeOwned>(
    params: &mut impl Iterator<Item = (usize, Value)>,
) -> Result<T, CoerceError> {
    let (index, value) = params.next().ok_or(CoerceError {
        index: usize::MAX,
        message: "missing param".to_string(),
    })?;
    serde_json::from_value(value).map_err(|e| CoerceError {
        index,
        message: e.to_string(),
    })
}

macro_rules! count {
    () => { 0 };
    ($head:ident $($tail:ident)*) => { 1 + count!($($tail)*) };
}

macro_rules! impl_notification_fn {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> NotificationFn<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R + Send + Sync + 'static,
            R: HandlerOutcome,
            $($arg: DeserializeOwned + Send + 'static,)*
        {
            const ARITY: usize = count!($($arg)*);

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn bind_params(this: &Arc<Self>, params: Vec<Value>) -> Result<BoundCall, CoerceError> {
                let mut params = params.into_iter().enumerate();
                $(
                    let $arg: $arg = coerce(&mut params)?;
                )*
                let handler = Arc::clone(this);
                Ok(Box::new(move || (*handler)($($arg),*).into_outcome()))
            }
        }
    };
}

impl_notification_fn!();
impl_notification_fn!(A1);
impl_notification_fn!(A1, A2);
impl_notification_fn!(A1, A2, A3);
impl_notification_fn!(A1, A2, A3, A4);
impl_notification_fn!(A1, A2, A3, A4, A5);
impl_notification_fn!(A1, A2, A3, A4, A5, A6);
impl_notification_fn!(A1, A2, A3, A4, A5, A6, A7);
impl_notification_fn!(A1, A2, A3, A4, A5, A6, A7, A8);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn arity_of<Args, F: NotificationFn<Args>>(_: &F) -> usize {
        F::ARITY
    }

    fn bind<Args, F: NotificationFn<Args>>(f: F, params: Vec<Value>) -> Result<BoundCall, CoerceError> {
        F::bind_params(&Arc::new(f), params)
    }

    #[test]
    fn test_arity_follows_signature() {
        assert_eq!(arity_of(&|| {}), 0);
        assert_eq!(arity_of(&|_: String| {}), 1);
        assert_eq!(arity_of(&|_: u8, _: Vec<i32>, _: Option<bool>| {}), 3);
    }

    #[test]
    fn test_params_coerced_in_position_order() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let call = bind(
            move |name: String, count: u32| {
                *sink.lock().unwrap() = Some((name, count));
            },
            vec![json!("jobs"), json!(3), json!("ignored extra")],
        )
        .unwrap();

        assert!(seen.lock().unwrap().is_none());
        call().unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(("jobs".to_string(), 3)));
    }

    #[test]
    fn test_coercion_failure_reports_index() {
        let err = bind(|_: String, _: u32| {}, vec![json!("ok"), json!("not a number")])
            .err()
            .unwrap();
        assert_eq!(err.index, 1);
    }

    #[test]
    fn test_error_outcome_is_reported() {
        let call = bind(
            |_: bool| -> anyhow::Result<()> { anyhow::bail!("handler refused") },
            vec![json!(true)],
        )
        .unwrap();
        assert_eq!(call().unwrap_err(), "handler refused");
    }
}
