//! # Handler abstraction and function-backed implementation.
//!
//! This module defines the user-facing execution contracts:
//!
//! - [`Handler`] — async, cancelable processing of one [`Task`];
//! - [`HandlerFn`] — closure-backed [`Handler`] for one-liners;
//! - [`ErrorHandler`] — optional synchronous failure callback;
//! - [`RetryDelayFn`] — computes the wait before the next attempt.
//!
//! A handler receives a [`CancellationToken`] that is cancelled on
//! per-task timeout, deadline, external cancel-by-id, or shutdown drain.
//! Handlers should watch it and exit promptly; uncooperative handlers are
//! abandoned on forced quit and their message is restored on next start.

use std::{borrow::Cow, future::Future, sync::Arc, sync::Mutex, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{error::TaskError, message::Task};

/// Shared handle to a handler object.
pub type HandlerRef = Arc<dyn Handler>;

/// Computes the delay before a failed task's next attempt:
/// `(retried, error, task) -> delay`. Invoked on the worker task; keep it
/// cheap and side-effect free.
pub type RetryDelayFn = Arc<dyn Fn(u32, &TaskError, &Task) -> Duration + Send + Sync>;

/// # Asynchronous, cancelable task processing.
///
/// `process_task` runs one attempt of one task. Returning `Ok(())` marks
/// the message done; any error routes it to retry or, once the retry
/// budget is exhausted, to the dead set. A panic inside the handler is
/// caught at the worker boundary and treated as
/// [`TaskError::Panic`](crate::TaskError::Panic).
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use relayq::{Handler, Task, TaskError};
///
/// struct Email;
///
/// #[async_trait]
/// impl Handler for Email {
///     async fn process_task(&self, ctx: CancellationToken, task: &Task) -> Result<(), TaskError> {
///         if ctx.is_cancelled() {
///             return Err(TaskError::Canceled);
///         }
///         let _ = task.payload.get("to");
///         // send the email...
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Executes one attempt of `task` until completion or cancellation.
    async fn process_task(&self, ctx: CancellationToken, task: &Task) -> Result<(), TaskError>;
}

/// Optional callback invoked synchronously before a failed message is
/// retried or killed. Its own failures are ignored.
pub trait ErrorHandler: Send + Sync + 'static {
    /// `retried` is the number of attempts already made; `retry` is the
    /// message's budget.
    fn handle_error(&self, task: &Task, err: &TaskError, retried: u32, retry: u32);
}

impl<F> ErrorHandler for F
where
    F: Fn(&Task, &TaskError, u32, u32) + Send + Sync + 'static,
{
    fn handle_error(&self, task: &Task, err: &TaskError, retried: u32, retry: u32) {
        self(task, err, retried, retry)
    }
}

/// # Function-backed handler implementation.
///
/// [`HandlerFn`] wraps a closure `Fnc: FnMut(CancellationToken, Task) -> Fut`.
/// The closure is guarded by a [`Mutex`] so `process_task(&self, ...)` can
/// be called concurrently even though the closure is `FnMut`: the lock is
/// held only while the future is **created**, never while it runs.
///
/// Use [`HandlerFn::arc`] for a one-liner that returns a [`HandlerRef`].
///
/// # Example
/// ```
/// use tokio_util::sync::CancellationToken;
/// use relayq::{HandlerFn, HandlerRef, Task, TaskError};
///
/// let h: HandlerRef = HandlerFn::arc("print", |_ctx: CancellationToken, task: Task| async move {
///     println!("processing {}", task.kind);
///     Ok::<_, TaskError>(())
/// });
/// ```
pub struct HandlerFn<Fnc, Fut>
where
    Fnc: FnMut(CancellationToken, Task) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    /// Stable handler name (diagnostics only).
    name: Cow<'static, str>,
    /// Underlying function (guarded by a mutex to allow `FnMut` with `&self`).
    func: Mutex<Fnc>,
}

impl<Fnc, Fut> HandlerFn<Fnc, Fut>
where
    Fnc: FnMut(CancellationToken, Task) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    /// Creates a new function-backed handler.
    pub fn new(name: impl Into<Cow<'static, str>>, func: Fnc) -> Self {
        Self {
            name: name.into(),
            func: Mutex::new(func),
        }
    }

    /// Creates the handler and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, func: Fnc) -> HandlerRef {
        Arc::new(Self::new(name, func))
    }

    /// Returns the handler name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl<Fnc, Fut> Handler for HandlerFn<Fnc, Fut>
where
    Fnc: FnMut(CancellationToken, Task) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn process_task(&self, ctx: CancellationToken, task: &Task) -> Result<(), TaskError> {
        let fut = {
            let mut f = self.func.lock().map_err(|_| TaskError::Fail {
                reason: "handler mutex poisoned".into(),
            })?;
            (f)(ctx, task.clone())
        };
        fut.await
    }
}
