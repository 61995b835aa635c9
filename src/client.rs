//! # Client for producing task messages.
//!
//! A [`Client`] registers tasks to be processed immediately or at some
//! time in the future. It is safe for concurrent use.
//!
//! Processing behavior is shaped per task with [`TaskOption`]s; when
//! options conflict, the last one wins.
//!
//! # Example
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use relayq::{Broker, Client, Payload, Task, TaskOption};
//!
//! async fn produce(broker: Arc<dyn Broker>) -> Result<(), relayq::BrokerError> {
//!     let client = Client::new(broker);
//!     let task = Task::new("email:welcome", Payload::new());
//!     client
//!         .enqueue(&task, &[TaskOption::Queue("critical".into()), TaskOption::MaxRetry(3)])
//!         .await?;
//!     client
//!         .enqueue_in(Duration::from_secs(60), &task, &[])
//!         .await
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    broker::{Broker, BrokerError},
    config::DEFAULT_QUEUE_NAME,
    message::{Task, TaskMessage},
};

/// Max retry count applied when no [`TaskOption::MaxRetry`] is given.
pub const DEFAULT_MAX_RETRY: u32 = 25;

/// Per-task processing option.
///
/// Unknown combinations cannot be expressed; duplicated options are
/// tolerated with last-wins semantics.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum TaskOption {
    /// Maximum number of retries. Negative counts are treated as zero.
    MaxRetry(i32),
    /// Queue to enqueue the task into. Case-insensitive; the lowercased
    /// name is used.
    Queue(String),
    /// How long one attempt may run. Zero means no limit.
    Timeout(Duration),
    /// Absolute deadline for the task. Overrides `Timeout` when both are
    /// present.
    Deadline(DateTime<Utc>),
}

/// Composed option values with defaults applied.
struct ComposedOptions {
    retry: u32,
    queue: String,
    timeout: Option<Duration>,
    deadline: Option<DateTime<Utc>>,
}

fn compose_options(opts: &[TaskOption]) -> ComposedOptions {
    let mut res = ComposedOptions {
        retry: DEFAULT_MAX_RETRY,
        queue: DEFAULT_QUEUE_NAME.to_string(),
        timeout: None,
        deadline: None,
    };
    for opt in opts {
        match opt {
            TaskOption::MaxRetry(n) => res.retry = (*n).max(0) as u32,
            TaskOption::Queue(name) => res.queue = name.to_lowercase(),
            TaskOption::Timeout(d) => {
                res.timeout = if d.is_zero() { None } else { Some(*d) };
            }
            TaskOption::Deadline(t) => res.deadline = Some(*t),
        }
    }
    res
}

/// Producer of task messages over any [`Broker`].
#[derive(Clone)]
pub struct Client {
    broker: Arc<dyn Broker>,
}

impl Client {
    /// Creates a new client over the given broker.
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Enqueues `task` to be processed immediately.
    pub async fn enqueue(&self, task: &Task, opts: &[TaskOption]) -> Result<(), BrokerError> {
        self.enqueue_at(Utc::now(), task, opts).await
    }

    /// Schedules `task` to be processed after the given delay.
    pub async fn enqueue_in(
        &self,
        delay: Duration,
        task: &Task,
        opts: &[TaskOption],
    ) -> Result<(), BrokerError> {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        let when = Utc::now()
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.enqueue_at(when, task, opts).await
    }

    /// Schedules `task` to be processed at the specified time.
    pub async fn enqueue_at(
        &self,
        when: DateTime<Utc>,
        task: &Task,
        opts: &[TaskOption],
    ) -> Result<(), BrokerError> {
        let opt = compose_options(opts);
        let mut msg = TaskMessage::new(task, opt.queue, opt.retry);
        msg.timeout = opt.timeout;
        msg.deadline = opt.deadline;

        if when <= Utc::now() {
            self.broker.enqueue(&msg).await
        } else {
            self.broker.schedule(&msg, when).await
        }
    }
}
