use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    broker::Broker,
    error::TaskError,
    events::{Bus, Event, EventKind},
    handler::{ErrorHandler, Handler, RetryDelayFn},
    message::{Task, TaskMessage},
    registry::Cancelations,
    state::ProcessState,
    syncer::{SyncOp, SyncRequest, SyncSender},
};

/// Per-message execution context, cloned from the processor's prototype
/// for every admitted message.
#[derive(Clone)]
pub(crate) struct Worker {
    pub(crate) broker: Arc<dyn Broker>,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) error_handler: Option<Arc<dyn ErrorHandler>>,
    pub(crate) retry_delay: RetryDelayFn,
    pub(crate) cancelations: Arc<Cancelations>,
    pub(crate) state: Arc<ProcessState>,
    pub(crate) bus: Bus,
    pub(crate) quit: CancellationToken,
    pub(crate) sync_tx: Option<SyncSender>,
}

impl Worker {
    /// Runs one attempt of `msg` and routes the outcome to the broker.
    ///
    /// The admission permit is released when this returns, on every path.
    pub(crate) async fn run(self, msg: TaskMessage, _permit: OwnedSemaphorePermit) {
        let token = CancellationToken::new();
        self.arm_watchdog(&msg, &token);
        self.cancelations.add(msg.id.clone(), token.clone());

        // The handler runs in its own task: the forced-quit path below
        // abandons it mid-flight without tearing it down, and the registry
        // entry is removed when the handler returns no matter who is still
        // listening.
        let task = msg.task();
        let attempt = {
            let handler = Arc::clone(&self.handler);
            let cancelations = Arc::clone(&self.cancelations);
            let id = msg.id.clone();
            let task = task.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let res = perform(handler.as_ref(), token, &task).await;
                cancelations.delete(&id);
                res
            })
        };

        tokio::select! {
            _ = self.quit.cancelled() => {
                // Time is up: abandon the handler without updating broker
                // state. Restore on next start moves the message back to
                // its pending queue.
                self.bus.publish(
                    Event::now(EventKind::TaskAbandoned)
                        .with_id(msg.id.as_str())
                        .with_task(msg.kind.as_str()),
                );
            }
            joined = attempt => {
                let res = joined.unwrap_or_else(|e| {
                    Err(TaskError::Panic {
                        payload: join_failure_payload(e),
                    })
                });
                match res {
                    Ok(()) => self.mark_done(&msg).await,
                    Err(err) => self.mark_failed(&msg, &task, err).await,
                }
            }
        }

        self.state.delete_worker_stats(&msg.id);
    }

    /// Spawns a watchdog that cancels `token` at the message's effective
    /// execution bound, if it has one.
    fn arm_watchdog(&self, msg: &TaskMessage, token: &CancellationToken) {
        let Some(cancel_at) = cancel_instant(msg) else {
            return;
        };
        let token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(cancel_at) => token.cancel(),
                _ = token.cancelled() => {}
            }
        });
    }

    async fn mark_done(&self, msg: &TaskMessage) {
        match self.broker.done(msg).await {
            Ok(()) => {
                self.bus.publish(
                    Event::now(EventKind::TaskDone)
                        .with_id(msg.id.as_str())
                        .with_task(msg.kind.as_str()),
                );
            }
            Err(err) => {
                let err_msg =
                    format!("could not remove task id={} from in-progress: {err}", msg.id);
                let broker = Arc::clone(&self.broker);
                let msg_c = msg.clone();
                self.defer_sync(
                    msg,
                    err_msg,
                    Box::new(move || {
                        let broker = Arc::clone(&broker);
                        let msg = msg_c.clone();
                        async move { broker.done(&msg).await }.boxed()
                    }),
                );
            }
        }
    }

    async fn mark_failed(&self, msg: &TaskMessage, task: &Task, err: TaskError) {
        if let Some(handler) = &self.error_handler {
            handler.handle_error(task, &err, msg.retried, msg.retry);
        }
        if msg.retried >= msg.retry {
            self.kill(msg, &err).await;
        } else {
            self.retry(msg, task, &err).await;
        }
    }

    async fn retry(&self, msg: &TaskMessage, task: &Task, err: &TaskError) {
        let delay = (self.retry_delay)(msg.retried, err, task);
        let retry_at = saturating_add(Utc::now(), delay);
        let err_str = err.to_string();

        match self.broker.retry(msg, retry_at, &err_str).await {
            Ok(()) => {
                self.bus.publish(
                    Event::now(EventKind::TaskRetried)
                        .with_id(msg.id.as_str())
                        .with_task(msg.kind.as_str())
                        .with_retried(msg.retried)
                        .with_delay(delay)
                        .with_error(err_str),
                );
            }
            Err(berr) => {
                let err_msg =
                    format!("could not move task id={} from in-progress to retry: {berr}", msg.id);
                let broker = Arc::clone(&self.broker);
                let msg_c = msg.clone();
                self.defer_sync(
                    msg,
                    err_msg,
                    Box::new(move || {
                        let broker = Arc::clone(&broker);
                        let msg = msg_c.clone();
                        let err_str = err_str.clone();
                        async move { broker.retry(&msg, retry_at, &err_str).await }.boxed()
                    }),
                );
            }
        }
    }

    async fn kill(&self, msg: &TaskMessage, err: &TaskError) {
        let err_str = err.to_string();

        match self.broker.kill(msg, &err_str).await {
            Ok(()) => {
                self.bus.publish(
                    Event::now(EventKind::TaskKilled)
                        .with_id(msg.id.as_str())
                        .with_task(msg.kind.as_str())
                        .with_retried(msg.retried)
                        .with_error(err_str),
                );
            }
            Err(berr) => {
                let err_msg =
                    format!("could not move task id={} from in-progress to dead: {berr}", msg.id);
                let broker = Arc::clone(&self.broker);
                let msg_c = msg.clone();
                self.defer_sync(
                    msg,
                    err_msg,
                    Box::new(move || {
                        let broker = Arc::clone(&broker);
                        let msg = msg_c.clone();
                        let err_str = err_str.clone();
                        async move { broker.kill(&msg, &err_str).await }.boxed()
                    }),
                );
            }
        }
    }

    /// Publishes the deferral and hands the replayable call to the syncer.
    ///
    /// Without a conduit the message simply stays in-progress until the
    /// next start's restore pass.
    fn defer_sync(&self, msg: &TaskMessage, err_msg: String, op: SyncOp) {
        self.bus.publish(
            Event::now(EventKind::SyncDeferred)
                .with_id(msg.id.as_str())
                .with_error(err_msg.as_str()),
        );
        if let Some(tx) = &self.sync_tx {
            let _ = tx.send(SyncRequest::new(err_msg, op));
        }
    }
}

/// Calls the handler, converting a panic into a normal error value so it
/// never escapes the worker task.
pub(crate) async fn perform(
    handler: &dyn Handler,
    ctx: CancellationToken,
    task: &Task,
) -> Result<(), TaskError> {
    match AssertUnwindSafe(handler.process_task(ctx, task))
        .catch_unwind()
        .await
    {
        Ok(res) => res,
        Err(panic) => Err(TaskError::Panic {
            payload: panic_payload(panic.as_ref()),
        }),
    }
}

/// The effective execution bound of a message.
///
/// A deadline overrides a timeout when both are present (observed behavior
/// of the wire format, kept as-is).
fn cancel_instant(msg: &TaskMessage) -> Option<Instant> {
    if let Some(deadline) = msg.deadline {
        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        return Instant::now().checked_add(remaining);
    }
    msg.timeout.and_then(|t| Instant::now().checked_add(t))
}

fn saturating_add(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
    now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn panic_payload(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn join_failure_payload(err: tokio::task::JoinError) -> String {
    if err.is_panic() {
        panic_payload(err.into_panic().as_ref())
    } else {
        "worker task canceled".to_string()
    }
}
