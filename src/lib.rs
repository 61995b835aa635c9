//! # relayq
//!
//! **relayq** is a bounded-concurrency task processor over a shared
//! message broker.
//!
//! It consumes task messages from any store implementing the [`Broker`]
//! facade (a Redis-like system with atomic scripts, a SQL table, an
//! in-memory map in tests), executes user-supplied handlers under a
//! concurrency limit, and durably moves each message through
//! pending → in-progress → done | retry | dead. Delivery is
//! at-least-once: work owned by a crashed or force-quit process is
//! restored to its pending queue on the next start.
//!
//! ## Features
//!
//! | Area            | Description                                                      | Key types / traits                        |
//! |-----------------|------------------------------------------------------------------|-------------------------------------------|
//! | **Processing**  | Weighted multi-queue dispatch into a bounded worker pool.        | [`Processor`], [`Config`]                  |
//! | **Handlers**    | Async, cancelable task execution with panic recovery.            | [`Handler`], [`HandlerFn`], [`TaskError`]  |
//! | **Producing**   | Enqueue tasks immediately, after a delay, or at a time.          | [`Client`], [`TaskOption`]                 |
//! | **Broker**      | The eight atomic operations the processor consumes.              | [`Broker`], [`BrokerError`]                |
//! | **Cancellation**| Cancel in-flight tasks by id; cooperative shutdown drain.        | [`Cancelations`]                           |
//! | **Retries**     | Capped multiplicative delays with jitter, or a custom function.  | [`RetryPolicy`], [`JitterPolicy`]          |
//! | **Observability** | Typed lifecycle events on a broadcast bus.                     | [`Event`], [`EventKind`], [`Observer`]     |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LoggerObserver`] _(demo/reference only)_.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use relayq::{Broker, Config, HandlerFn, Processor, Task, TaskError};
//!
//! async fn serve(broker: Arc<dyn Broker>) {
//!     let handler = HandlerFn::arc("print", |ctx: CancellationToken, task: Task| async move {
//!         if ctx.is_cancelled() {
//!             return Err(TaskError::Canceled);
//!         }
//!         println!("processing {}", task.kind);
//!         Ok(())
//!     });
//!
//!     let processor = Processor::builder(Config::default(), broker, handler).build();
//!     processor.clone().start().await;
//!
//!     // ... on shutdown:
//!     processor.terminate().await;
//! }
//! ```
//!
//! ---

mod broker;
mod client;
mod config;
mod error;
mod events;
mod handler;
mod message;
mod observer;
mod policies;
mod processor;
mod registry;
mod selector;
mod state;
mod syncer;
mod worker;

// ---- Public re-exports ----

pub use broker::{Broker, BrokerError};
pub use client::{Client, TaskOption, DEFAULT_MAX_RETRY};
pub use config::{Config, DEFAULT_QUEUE_NAME};
pub use error::TaskError;
pub use events::{Bus, Event, EventKind};
pub use handler::{ErrorHandler, Handler, HandlerFn, HandlerRef, RetryDelayFn};
pub use message::{Payload, Task, TaskMessage};
pub use observer::Observer;
pub use policies::{JitterPolicy, RetryPolicy};
pub use processor::{Processor, ProcessorBuilder};
pub use registry::Cancelations;
pub use state::{ProcessState, WorkerInfo};
pub use syncer::{sync_channel, SyncOp, SyncReceiver, SyncRequest, SyncSender};

// Optional: expose a simple built-in logger observer (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use observer::LoggerObserver;
