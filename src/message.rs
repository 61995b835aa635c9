//! # Task and message types.
//!
//! [`Task`] is the unit handed to handlers: a routing `kind` plus an opaque
//! key/value payload. [`TaskMessage`] is the broker-persisted envelope the
//! processor moves between broker-side sets; it carries the retry
//! accounting and the execution bounds (timeout/deadline).
//!
//! At any instant a message lives in exactly one broker set: a pending
//! queue, in-progress, scheduled, retry, or dead.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque payload attached to a task. The processor never inspects it.
pub type Payload = HashMap<String, serde_json::Value>;

/// # Unit of work handed to a [`Handler`](crate::Handler).
///
/// `kind` selects the handler routing; `payload` is opaque to the runtime.
///
/// ## Example
/// ```
/// use relayq::{Payload, Task};
///
/// let mut payload = Payload::new();
/// payload.insert("user_id".into(), serde_json::json!(42));
/// let task = Task::new("email:welcome", payload);
/// assert_eq!(task.kind, "email:welcome");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Routing key selecting the handler behavior.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque key/value payload.
    pub payload: Payload,
}

impl Task {
    /// Creates a new task with the given kind and payload.
    pub fn new(kind: impl Into<String>, payload: Payload) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Broker-persisted message wrapping a [`Task`] with delivery metadata.
///
/// The broker owns the encoding; the processor depends only on the field
/// semantics. `retried` grows monotonically; when it reaches `retry` the
/// next failure moves the message to the dead set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Globally unique identifier, assigned at enqueue.
    pub id: String,
    /// Routing key, mirrors [`Task::kind`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque payload, mirrors [`Task::payload`].
    pub payload: Payload,
    /// Lowercase name of the queue this message belongs to.
    pub queue: String,
    /// Maximum number of retries.
    pub retry: u32,
    /// Number of prior attempts.
    pub retried: u32,
    /// Per-attempt execution limit. `None` means unlimited.
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Absolute execution deadline. `None` means none.
    ///
    /// When both `timeout` and `deadline` are set, the deadline wins.
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    /// Last failure reason, written on retry/kill transitions.
    #[serde(default)]
    pub error_msg: String,
}

impl TaskMessage {
    /// Creates a fresh message for `task` with a new unique id.
    pub fn new(task: &Task, queue: impl Into<String>, retry: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: task.kind.clone(),
            payload: task.payload.clone(),
            queue: queue.into(),
            retry,
            retried: 0,
            timeout: None,
            deadline: None,
            error_msg: String::new(),
        }
    }

    /// Rebuilds the handler-facing [`Task`] from this message.
    pub fn task(&self) -> Task {
        Task {
            kind: self.kind.clone(),
            payload: self.payload.clone(),
        }
    }
}
