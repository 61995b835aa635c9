//! # Broker facade: the atomic operations the processor consumes.
//!
//! The processor never talks to a concrete store; it drives the eight
//! operations of the [`Broker`] trait, each expected to be atomic and
//! crash-safe on the broker side (server-side scripts in a Redis-like
//! system, a transactional table in SQL, an in-memory map in tests).
//!
//! The only structured failure the processor branches on is
//! [`BrokerError::NoProcessableTask`]; every other error is treated as
//! transient.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::message::TaskMessage;

/// # Errors surfaced by broker operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BrokerError {
    /// All polled queues were empty. A benign dequeue miss, not a fault.
    #[error("no processable task in queues")]
    NoProcessableTask,

    /// Transient broker failure (connection, script, encoding). The
    /// processor logs or defers these; it never halts on them.
    #[error("broker unavailable: {reason}")]
    Unavailable { reason: String },
}

impl BrokerError {
    /// Convenience constructor for [`BrokerError::Unavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        BrokerError::Unavailable {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BrokerError::NoProcessableTask => "no_processable_task",
            BrokerError::Unavailable { .. } => "broker_unavailable",
        }
    }
}

/// # Atomic message-store operations consumed by the processor.
///
/// Implementations must make each call atomic: it either completes its
/// whole effect or none of it. The processor relies on that to keep every
/// message in exactly one broker-side set at any instant.
///
/// `dequeue` over a single queue may block waiting for work; over multiple
/// queues it must return [`BrokerError::NoProcessableTask`] promptly so
/// the dispatch loop can pace its polling.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Pushes `msg` onto the tail of its pending queue.
    async fn enqueue(&self, msg: &TaskMessage) -> Result<(), BrokerError>;

    /// Stores `msg` in the scheduled set, due at `process_at`. An external
    /// scheduler promotes due messages into their pending queues.
    async fn schedule(
        &self,
        msg: &TaskMessage,
        process_at: DateTime<Utc>,
    ) -> Result<(), BrokerError>;

    /// Pops the head of the first non-empty pending queue in `queues`
    /// (tried left to right) and atomically records it in the in-progress
    /// set. Fails with [`BrokerError::NoProcessableTask`] when every queue
    /// is empty.
    async fn dequeue(&self, queues: &[String]) -> Result<TaskMessage, BrokerError>;

    /// Removes `msg` from in-progress and pushes it back to the **head**
    /// of its pending queue. Used when shutdown aborts admission.
    async fn requeue(&self, msg: &TaskMessage) -> Result<(), BrokerError>;

    /// Removes `msg` from in-progress. Terminal success transition.
    async fn done(&self, msg: &TaskMessage) -> Result<(), BrokerError>;

    /// Increments the retry count, records `err_msg`, removes `msg` from
    /// in-progress and inserts it into the retry set keyed by `retry_at`.
    async fn retry(
        &self,
        msg: &TaskMessage,
        retry_at: DateTime<Utc>,
        err_msg: &str,
    ) -> Result<(), BrokerError>;

    /// Records `err_msg`, removes `msg` from in-progress and inserts it
    /// into the dead set keyed by the current time.
    async fn kill(&self, msg: &TaskMessage, err_msg: &str) -> Result<(), BrokerError>;

    /// Moves every message in the in-progress set back to the head of its
    /// pending queue; returns how many were moved. Invoked at startup and
    /// after shutdown to restore work abandoned by this or a crashed
    /// process.
    async fn requeue_all(&self) -> Result<u64, BrokerError>;
}
