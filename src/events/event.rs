//! Runtime events emitted by the processor.
//!
//! [`EventKind`] classifies the lifecycle of messages and of the processor
//! itself; [`Event`] carries optional metadata (message id, queue, error
//! text, retry delay). Events are the crate's logging surface: attach an
//! [`Observer`](crate::observer::Observer) to consume them.

use std::time::{Duration, SystemTime};

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Shutdown ===
    /// Shutdown was requested; no new workers will be admitted.
    ShutdownRequested,
    /// The dispatch loop exited.
    DispatchStopped,
    /// Every worker released its admission permit within the grace window.
    AllWorkersStopped,
    /// Grace window elapsed; in-flight workers are being force-quit.
    GraceExceeded,

    // === Message lifecycle ===
    /// A worker is starting to execute a message.
    TaskStarting,
    /// Handler returned success; message removed from in-progress.
    TaskDone,
    /// Handler failed; message scheduled for a later retry.
    TaskRetried,
    /// Retry budget exhausted; message moved to the dead set.
    TaskKilled,
    /// Forced quit abandoned the worker mid-handler; the message stays
    /// in-progress until restore reconciles it.
    TaskAbandoned,

    // === Broker interaction ===
    /// Dequeue failed with a transient error (rate-limited).
    DequeueFailed,
    /// Shutdown-abort requeue failed; the message stays in-progress until
    /// restore reconciles it.
    RequeueFailed,
    /// A restore pass failed; retried on the next start.
    RestoreFailed,
    /// A terminal transition failed and was handed to the sync conduit.
    SyncDeferred,
    /// Startup/shutdown restore moved unfinished messages back to pending.
    TasksRestored,
}

/// Runtime event with optional metadata.
#[derive(Debug, Clone)]
pub struct Event {
    /// The kind of event.
    pub kind: EventKind,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Message id, if applicable.
    pub id: Option<String>,
    /// Task routing kind, if applicable.
    pub task: Option<String>,
    /// Queue name, if applicable.
    pub queue: Option<String>,
    /// Error message, if the event represents a failure.
    pub error: Option<String>,
    /// Delay before the next retry attempt.
    pub delay: Option<Duration>,
    /// Attempts already made, for retry/kill events.
    pub retried: Option<u32>,
    /// Message count, for restore events.
    pub count: Option<u64>,
}

impl Event {
    /// Creates a new event of the given kind stamped with the current time.
    pub fn now(kind: EventKind) -> Self {
        Self {
            kind,
            at: SystemTime::now(),
            id: None,
            task: None,
            queue: None,
            error: None,
            delay: None,
            retried: None,
            count: None,
        }
    }

    /// Attaches a message id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attaches a task routing kind.
    pub fn with_task(mut self, kind: impl Into<String>) -> Self {
        self.task = Some(kind.into());
        self
    }

    /// Attaches a queue name.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    /// Attaches a retry delay.
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    /// Attaches the attempt count.
    pub fn with_retried(mut self, n: u32) -> Self {
        self.retried = Some(n);
        self
    }

    /// Attaches a message count.
    pub fn with_count(mut self, n: u64) -> Self {
        self.count = Some(n);
        self
    }
}
