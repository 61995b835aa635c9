//! # Error types used by the processor and task handlers.
//!
//! This module defines [`TaskError`], the error type returned by task
//! handler executions. Broker-side failures live in
//! [`BrokerError`](crate::broker::BrokerError).
//!
//! [`TaskError`] provides `as_label` for logs/metrics and
//! `is_cancellation()` to distinguish cooperative cancellation from real
//! failures.

use thiserror::Error;

/// # Errors produced by task handler execution.
///
/// Every variant drives the same outcome routing: the message is retried
/// until its retry budget is exhausted, then moved to the dead set.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// Handler execution failed but may succeed if retried.
    #[error("{reason}")]
    Fail { reason: String },

    /// Handler observed cancellation (timeout, deadline, external cancel,
    /// or shutdown drain) and stopped cooperatively.
    ///
    /// This is **not an error** in the traditional sense, but signals
    /// intentional termination. It still consumes a retry attempt.
    #[error("context canceled")]
    Canceled,

    /// Handler panicked; the payload is the stringified panic value.
    #[error("panic: {payload}")]
    Panic { payload: String },
}

impl TaskError {
    /// Convenience constructor for [`TaskError::Fail`].
    pub fn fail(reason: impl Into<String>) -> Self {
        TaskError::Fail {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Canceled => "task_canceled",
            TaskError::Panic { .. } => "task_panic",
        }
    }

    /// Indicates whether the error represents cooperative cancellation
    /// rather than a handler failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }
}
