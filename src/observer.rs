use async_trait::async_trait;

use crate::events::Event;
#[cfg(feature = "logging")]
use crate::events::EventKind;

/// Hook into processor lifecycle events (logging, metrics, custom sinks).
///
/// Subscribe an observer with
/// [`Processor::spawn_observer`](crate::Processor::spawn_observer); each
/// event is delivered in publish order on a dedicated listener task.
#[async_trait]
pub trait Observer: Send + Sync + 'static {
    async fn on_event(&self, event: &Event);
}

/// Simple built-in observer that prints events to stdout.
///
/// Demo/reference only; enable with `--features logging`.
#[cfg(feature = "logging")]
pub struct LoggerObserver;

#[cfg(feature = "logging")]
#[async_trait]
impl Observer for LoggerObserver {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::TaskStarting => {
                println!("[starting] id={:?} type={:?} queue={:?}", e.id, e.task, e.queue);
            }
            EventKind::TaskDone => {
                println!("[done] id={:?}", e.id);
            }
            EventKind::TaskRetried => {
                println!(
                    "[retry] id={:?} retried={:?} delay={:?} err={:?}",
                    e.id, e.retried, e.delay, e.error
                );
            }
            EventKind::TaskKilled => {
                println!("[killed] id={:?} retried={:?} err={:?}", e.id, e.retried, e.error);
            }
            EventKind::TaskAbandoned => {
                println!("[abandoned] id={:?}", e.id);
            }
            EventKind::DequeueFailed => {
                println!("[dequeue-error] err={:?}", e.error);
            }
            EventKind::RequeueFailed => {
                println!("[requeue-error] id={:?} err={:?}", e.id, e.error);
            }
            EventKind::RestoreFailed => {
                println!("[restore-error] err={:?}", e.error);
            }
            EventKind::SyncDeferred => {
                println!("[sync-deferred] id={:?} err={:?}", e.id, e.error);
            }
            EventKind::TasksRestored => {
                println!("[restored] count={:?}", e.count);
            }
            EventKind::ShutdownRequested => {
                println!("[shutdown-requested]");
            }
            EventKind::DispatchStopped => {
                println!("[dispatch-stopped]");
            }
            EventKind::AllWorkersStopped => {
                println!("[all-workers-stopped]");
            }
            EventKind::GraceExceeded => {
                println!("[grace-exceeded]");
            }
        }
    }
}
