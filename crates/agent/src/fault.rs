//! Panic boundary for user-supplied code
//!
//! Validators and tool handlers run behind [`guard`] / [`guard_async`] so a
//! panic becomes a [`Fault`] instead of unwinding through the agent loop.

use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

/// A captured panic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault(pub String);

impl Fault {
    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self(message)
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panicked: {}", self.0)
    }
}

impl std::error::Error for Fault {}

/// Run `f`, capturing a panic
pub fn guard<T>(f: impl FnOnce() -> T) -> Result<T, Fault> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(Fault::from_panic)
}

/// Await `future`, capturing a panic raised while polling it
pub async fn guard_async<F: Future>(future: F) -> Result<F::Output, Fault> {
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(Fault::from_panic)
}
