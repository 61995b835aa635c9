use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    broker::{Broker, BrokerError},
    config::Config,
    events::{Bus, Event, EventKind},
    handler::{ErrorHandler, HandlerRef, RetryDelayFn},
    message::TaskMessage,
    observer::Observer,
    registry::Cancelations,
    selector::QueueSelector,
    state::ProcessState,
    syncer::SyncSender,
    worker::Worker,
};

/// Minimum spacing between published dequeue-error events.
const DEQUEUE_ERROR_EVERY: Duration = Duration::from_secs(3);

/// # The processor: queues in, handler outcomes out.
///
/// One long-lived dispatch task pulls messages from the configured queues
/// and admits up to `concurrency` concurrent workers through a counting
/// semaphore. Each worker executes the user handler with per-task
/// cancellation, then drives the message's terminal broker transition.
///
/// Delivery is at-least-once: a crash or forced quit leaves messages in
/// the broker's in-progress set, and the next [`start`](Processor::start)
/// moves them back to their pending queues.
///
/// Shutdown is three-phase (see [`terminate`](Processor::terminate)) and
/// idempotent. A terminated processor cannot be restarted.
pub struct Processor {
    broker: Arc<dyn Broker>,
    bus: Bus,
    state: Arc<ProcessState>,
    cancelations: Arc<Cancelations>,
    selector: QueueSelector,
    sema: Arc<Semaphore>,
    concurrency: usize,
    shutdown_timeout: Duration,
    poll_interval: Duration,
    /// Prototype execution context, cloned per admitted message.
    worker: Worker,

    /// Cancelled when shutdown starts; unblocks a dispatcher waiting on
    /// admission so it can requeue instead.
    abort: CancellationToken,
    /// Cancelled after `abort`; the dispatch loop exits at its next check.
    done: CancellationToken,
    /// Cancelled when the drain window elapses; in-flight workers abandon
    /// their handlers.
    quit: CancellationToken,
    stopping: AtomicBool,

    dispatcher: StdMutex<Option<JoinHandle<()>>>,
    dequeue_err_gate: LogGate,
}

impl Processor {
    /// Starts building a processor over `broker` that routes every message
    /// to `handler`.
    pub fn builder(config: Config, broker: Arc<dyn Broker>, handler: HandlerRef) -> ProcessorBuilder {
        ProcessorBuilder {
            config,
            broker,
            handler,
            error_handler: None,
            retry_delay: None,
            sync_tx: None,
            cancelations: None,
            state: None,
        }
    }

    /// Restores unfinished messages from a previous run, then spawns the
    /// dispatch loop. Call once, with a clone of the shared handle.
    pub async fn start(self: Arc<Self>) {
        self.restore().await;

        let mut slot = lock(&self.dispatcher);
        if slot.is_some() {
            return;
        }
        let me = Arc::clone(&self);
        *slot = Some(tokio::spawn(async move { me.dispatch().await }));
    }

    /// Stops dispatching new work. Running workers are unaffected.
    ///
    /// Safe to call multiple times.
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.bus.publish(Event::now(EventKind::ShutdownRequested));
        // Unblock a dispatcher waiting on admission first, then end the
        // dispatch loop after its current iteration.
        self.abort.cancel();
        self.done.cancel();
    }

    /// Full three-phase shutdown: stop dispatching, drain workers within
    /// the grace window (force-quitting stragglers), then restore whatever
    /// is still in-progress back to its pending queue.
    ///
    /// Safe to call multiple times. Once terminated, the processor cannot
    /// be restarted.
    pub async fn terminate(&self) {
        self.stop();

        let handle = lock(&self.dispatcher).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        // Cooperative drain: every in-flight handler sees cancellation.
        for token in self.cancelations.get_all() {
            token.cancel();
        }

        // Holding all permits proves every worker has exited.
        let barrier = Arc::clone(&self.sema).acquire_many_owned(self.concurrency as u32);
        match time::timeout(self.shutdown_timeout, barrier).await {
            Ok(permits) => drop(permits),
            Err(_elapsed) => {
                self.bus.publish(Event::now(EventKind::GraceExceeded));
                self.quit.cancel();
                let barrier =
                    Arc::clone(&self.sema).acquire_many_owned(self.concurrency as u32);
                drop(barrier.await);
            }
        }
        self.bus.publish(Event::now(EventKind::AllWorkersStopped));

        self.restore().await;
    }

    /// Subscribes to the processor's runtime events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Spawns a background listener delivering every event to `observer`.
    pub fn spawn_observer(&self, observer: Arc<dyn Observer>) {
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            while let Ok(ev) = rx.recv().await {
                observer.on_event(&ev).await;
            }
        });
    }

    /// The shared cancellation registry; `cancel(id)` on it cancels the
    /// matching in-flight task.
    pub fn cancelations(&self) -> &Arc<Cancelations> {
        &self.cancelations
    }

    /// Live worker stats.
    pub fn process_state(&self) -> &Arc<ProcessState> {
        &self.state
    }

    async fn dispatch(&self) {
        while !self.done.is_cancelled() {
            self.exec().await;
        }
        self.bus.publish(Event::now(EventKind::DispatchStopped));
    }

    /// One dispatch tick: pull a message and hand it to a worker, or back
    /// off on an empty poll.
    async fn exec(&self) {
        let queues = self.selector.queues();
        let res = tokio::select! {
            _ = self.done.cancelled() => return,
            res = self.broker.dequeue(&queues) => res,
        };

        let msg = match res {
            Ok(msg) => msg,
            Err(BrokerError::NoProcessableTask) => {
                // A single-queue dequeue blocks broker-side; polling
                // several queues needs pacing.
                if self.selector.len() > 1 {
                    tokio::select! {
                        _ = self.done.cancelled() => {}
                        _ = time::sleep(self.poll_interval) => {}
                    }
                }
                return;
            }
            Err(err) => {
                if self.dequeue_err_gate.allow() {
                    self.bus
                        .publish(Event::now(EventKind::DequeueFailed).with_error(err.to_string()));
                }
                return;
            }
        };

        tokio::select! {
            _ = self.abort.cancelled() => {
                // Shutdown is starting: hand the message back instead of
                // admitting a worker.
                self.requeue(&msg).await;
            }
            permit = Arc::clone(&self.sema).acquire_owned() => {
                match permit {
                    Ok(permit) => self.spawn_worker(msg, permit),
                    Err(_) => self.requeue(&msg).await,
                }
            }
        }
    }

    fn spawn_worker(&self, msg: TaskMessage, permit: OwnedSemaphorePermit) {
        self.state.add_worker_stats(&msg, SystemTime::now());
        self.bus.publish(
            Event::now(EventKind::TaskStarting)
                .with_id(msg.id.as_str())
                .with_task(msg.kind.as_str())
                .with_queue(msg.queue.as_str()),
        );
        let worker = self.worker.clone();
        tokio::spawn(async move { worker.run(msg, permit).await });
    }

    async fn requeue(&self, msg: &TaskMessage) {
        if let Err(err) = self.broker.requeue(msg).await {
            self.bus.publish(
                Event::now(EventKind::RequeueFailed)
                    .with_id(msg.id.as_str())
                    .with_error(err.to_string()),
            );
        }
    }

    /// Moves every in-progress message back to its pending queue.
    async fn restore(&self) {
        match self.broker.requeue_all().await {
            Ok(n) if n > 0 => {
                self.bus
                    .publish(Event::now(EventKind::TasksRestored).with_count(n));
            }
            Ok(_) => {}
            Err(err) => {
                self.bus
                    .publish(Event::now(EventKind::RestoreFailed).with_error(err.to_string()));
            }
        }
    }
}

/// Builder wiring optional collaborators into a [`Processor`].
pub struct ProcessorBuilder {
    config: Config,
    broker: Arc<dyn Broker>,
    handler: HandlerRef,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    retry_delay: Option<RetryDelayFn>,
    sync_tx: Option<SyncSender>,
    cancelations: Option<Arc<Cancelations>>,
    state: Option<Arc<ProcessState>>,
}

impl ProcessorBuilder {
    /// Callback invoked before each retry/kill transition.
    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Custom retry-delay function, replacing the config's
    /// [`RetryPolicy`](crate::RetryPolicy).
    pub fn with_retry_delay(mut self, f: RetryDelayFn) -> Self {
        self.retry_delay = Some(f);
        self
    }

    /// Conduit to an external syncer replaying failed terminal
    /// transitions (see [`sync_channel`](crate::sync_channel)).
    pub fn with_sync_conduit(mut self, tx: SyncSender) -> Self {
        self.sync_tx = Some(tx);
        self
    }

    /// Shares an externally owned cancellation registry, so callers
    /// outside the processor can cancel tasks by id.
    pub fn with_cancelations(mut self, cancelations: Arc<Cancelations>) -> Self {
        self.cancelations = Some(cancelations);
        self
    }

    /// Shares an externally owned worker-stats map (heartbeat reporters,
    /// admin introspection).
    pub fn with_process_state(mut self, state: Arc<ProcessState>) -> Self {
        self.state = Some(state);
        self
    }

    /// Assembles the processor.
    pub fn build(self) -> Arc<Processor> {
        let cfg = self.config.normalized();
        let bus = Bus::new(cfg.bus_capacity);
        let selector = QueueSelector::new(&cfg.queues, cfg.strict_priority);
        let cancelations = self.cancelations.unwrap_or_default();
        let state = self.state.unwrap_or_default();
        let quit = CancellationToken::new();

        let retry_policy = cfg.retry;
        let retry_delay: RetryDelayFn = self
            .retry_delay
            .unwrap_or_else(|| Arc::new(move |retried, _err, _task| retry_policy.delay(retried)));

        let worker = Worker {
            broker: Arc::clone(&self.broker),
            handler: self.handler,
            error_handler: self.error_handler,
            retry_delay,
            cancelations: Arc::clone(&cancelations),
            state: Arc::clone(&state),
            bus: bus.clone(),
            quit: quit.clone(),
            sync_tx: self.sync_tx,
        };

        Arc::new(Processor {
            broker: self.broker,
            bus,
            state,
            cancelations,
            selector,
            sema: Arc::new(Semaphore::new(cfg.concurrency)),
            concurrency: cfg.concurrency,
            shutdown_timeout: cfg.shutdown_timeout,
            poll_interval: cfg.poll_interval,
            worker,
            abort: CancellationToken::new(),
            done: CancellationToken::new(),
            quit,
            stopping: AtomicBool::new(false),
            dispatcher: StdMutex::new(None),
            dequeue_err_gate: LogGate::new(DEQUEUE_ERROR_EVERY),
        })
    }
}

/// Locks a std mutex, recovering from poisoning (no lock user panics).
fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Allows at most one event per interval.
struct LogGate {
    every: Duration,
    last: StdMutex<Option<Instant>>,
}

impl LogGate {
    fn new(every: Duration) -> Self {
        Self {
            every,
            last: StdMutex::new(None),
        }
    }

    fn allow(&self) -> bool {
        let mut last = lock(&self.last);
        let now = Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < self.every => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}
