//! End-to-end processor behavior over the in-memory broker.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use relayq::{
    sync_channel, Broker, Client, Config, ErrorHandler, HandlerFn, Payload, Processor,
    RetryDelayFn, Task, TaskError, TaskOption,
};
use support::{wait_until, MemoryBroker};

fn single_queue_config(concurrency: usize) -> Config {
    let mut cfg = Config::default();
    cfg.concurrency = concurrency;
    cfg.queues = [("default".to_string(), 1)].into();
    cfg
}

fn zero_delay() -> RetryDelayFn {
    Arc::new(|_retried, _err, _task| Duration::ZERO)
}

fn payload(key: &str, value: impl Into<serde_json::Value>) -> Payload {
    Payload::from([(key.to_string(), value.into())])
}

#[tokio::test(flavor = "multi_thread")]
async fn processes_enqueued_tasks_to_done() {
    let broker = MemoryBroker::new();
    let client = Client::new(broker.clone() as Arc<dyn Broker>);

    let seen = Arc::new(Mutex::new(Vec::<i64>::new()));
    let handler = {
        let seen = Arc::clone(&seen);
        HandlerFn::arc("record", move |_ctx: CancellationToken, task: Task| {
            let seen = Arc::clone(&seen);
            async move {
                let n = task.payload["n"].as_i64().unwrap_or(-1);
                seen.lock().unwrap().push(n);
                Ok(())
            }
        })
    };

    for n in 0..3 {
        let task = Task::new("record", payload("n", n));
        client.enqueue(&task, &[]).await.unwrap();
    }

    let processor =
        Processor::builder(single_queue_config(2), broker.clone(), handler).build();
    processor.clone().start().await;

    wait_until("3 tasks done", || broker.done_count() == 3).await;
    processor.terminate().await;

    let mut seen = seen.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2]);
    assert!(broker.in_progress().is_empty());
    assert_eq!(broker.pending_total(), 0);
    assert!(broker.retry_set().is_empty());
    assert!(broker.dead().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn picks_up_tasks_enqueued_after_start() {
    let broker = MemoryBroker::new();
    let client = Client::new(broker.clone() as Arc<dyn Broker>);

    let handler = HandlerFn::arc("noop", |_ctx: CancellationToken, _task: Task| async move {
        Ok(())
    });

    let processor =
        Processor::builder(single_queue_config(1), broker.clone(), handler).build();
    processor.clone().start().await;

    // The single-queue dequeue is parked broker-side; an enqueue wakes it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let task = Task::new("noop", Payload::new());
    client.enqueue(&task, &[]).await.unwrap();

    wait_until("task done", || broker.done_count() == 1).await;
    processor.terminate().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn retries_until_budget_then_kills() {
    let broker = MemoryBroker::new();
    let client = Client::new(broker.clone() as Arc<dyn Broker>);

    let attempts = Arc::new(AtomicUsize::new(0));
    let handler = {
        let attempts = Arc::clone(&attempts);
        HandlerFn::arc("boom", move |_ctx: CancellationToken, _task: Task| {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(TaskError::fail("boom"))
            }
        })
    };

    let task = Task::new("boom", Payload::new());
    client
        .enqueue(&task, &[TaskOption::MaxRetry(2)])
        .await
        .unwrap();

    let processor = Processor::builder(single_queue_config(1), broker.clone(), handler)
        .with_retry_delay(zero_delay())
        .build();
    processor.clone().start().await;

    wait_until("message killed", || broker.dead().len() == 1).await;
    processor.terminate().await;

    let dead = broker.dead();
    assert_eq!(dead[0].retried, 2);
    assert_eq!(dead[0].error_msg, "boom");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(broker.done_count(), 0);
    assert!(broker.in_progress().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_cancels_running_handler() {
    let broker = MemoryBroker::new();
    let client = Client::new(broker.clone() as Arc<dyn Broker>);

    let observed_after = Arc::new(Mutex::new(None::<Duration>));
    let started = Instant::now();
    let handler = {
        let observed_after = Arc::clone(&observed_after);
        HandlerFn::arc("sleepy", move |ctx: CancellationToken, _task: Task| {
            let observed_after = Arc::clone(&observed_after);
            async move {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        *observed_after.lock().unwrap() = Some(started.elapsed());
                        Err(TaskError::Canceled)
                    }
                    _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(()),
                }
            }
        })
    };

    let task = Task::new("sleepy", Payload::new());
    client
        .enqueue(&task, &[TaskOption::Timeout(Duration::from_millis(100))])
        .await
        .unwrap();

    // Park retries far in the future so the message stays observable.
    let processor = Processor::builder(single_queue_config(1), broker.clone(), handler)
        .with_retry_delay(Arc::new(|_, _, _| Duration::from_secs(60)))
        .build();
    processor.clone().start().await;

    wait_until("message moved to retry", || broker.retry_set().len() == 1).await;
    processor.terminate().await;

    let observed = observed_after.lock().unwrap().expect("handler never saw cancellation");
    assert!(
        observed < Duration::from_millis(800),
        "cancellation observed after {observed:?}"
    );
    let retried = broker.retry_set();
    assert_eq!(retried[0].retried, 1);
    assert_eq!(retried[0].error_msg, "context canceled");
}

#[tokio::test(flavor = "multi_thread")]
async fn strict_priority_orders_dequeues() {
    let broker = MemoryBroker::new();
    let client = Client::new(broker.clone() as Arc<dyn Broker>);

    let order = Arc::new(Mutex::new(Vec::<String>::new()));
    let handler = {
        let order = Arc::clone(&order);
        HandlerFn::arc("record", move |_ctx: CancellationToken, task: Task| {
            let order = Arc::clone(&order);
            async move {
                order.lock().unwrap().push(task.kind);
                Ok(())
            }
        })
    };

    for queue in ["low", "default", "critical"] {
        let task = Task::new(queue, Payload::new());
        client
            .enqueue(&task, &[TaskOption::Queue(queue.into())])
            .await
            .unwrap();
    }

    let mut cfg = Config::default();
    cfg.concurrency = 1;
    cfg.queues = [
        ("critical".to_string(), 6),
        ("default".to_string(), 3),
        ("low".to_string(), 1),
    ]
    .into();
    cfg.strict_priority = true;
    cfg.poll_interval = Duration::from_millis(20);

    let processor = Processor::builder(cfg, broker.clone(), handler).build();
    processor.clone().start().await;

    wait_until("3 tasks done", || broker.done_count() == 3).await;
    processor.terminate().await;

    assert_eq!(
        order.lock().unwrap().clone(),
        vec!["critical".to_string(), "default".to_string(), "low".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_panic_is_isolated_and_reported() {
    let broker = MemoryBroker::new();
    let client = Client::new(broker.clone() as Arc<dyn Broker>);

    let handler = HandlerFn::arc("mixed", |_ctx: CancellationToken, task: Task| async move {
        if task.kind == "explode" {
            panic!("42");
        }
        Ok(())
    });

    let reported = Arc::new(Mutex::new(Vec::<String>::new()));
    let error_handler: Arc<dyn ErrorHandler> = {
        let reported = Arc::clone(&reported);
        Arc::new(
            move |_task: &Task, err: &TaskError, _retried: u32, _retry: u32| {
                reported.lock().unwrap().push(err.to_string());
            },
        )
    };

    let explode = Task::new("explode", Payload::new());
    client
        .enqueue(&explode, &[TaskOption::MaxRetry(0)])
        .await
        .unwrap();

    let processor = Processor::builder(single_queue_config(1), broker.clone(), handler)
        .with_error_handler(error_handler)
        .build();
    processor.clone().start().await;

    wait_until("panicking task killed", || broker.dead().len() == 1).await;

    // Dispatch survives the panic and keeps processing.
    let ok = Task::new("ok", Payload::new());
    client.enqueue(&ok, &[]).await.unwrap();
    wait_until("follow-up task done", || broker.done_count() == 1).await;
    processor.terminate().await;

    assert_eq!(reported.lock().unwrap().clone(), vec!["panic: 42".to_string()]);
    assert_eq!(broker.dead()[0].error_msg, "panic: 42");
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrency_stays_bounded() {
    let broker = MemoryBroker::new();
    let client = Client::new(broker.clone() as Arc<dyn Broker>);

    let current = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let handler = {
        let current = Arc::clone(&current);
        let max_seen = Arc::clone(&max_seen);
        HandlerFn::arc("gauge", move |_ctx: CancellationToken, _task: Task| {
            let current = Arc::clone(&current);
            let max_seen = Arc::clone(&max_seen);
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
    };

    for _ in 0..6 {
        let task = Task::new("gauge", Payload::new());
        client.enqueue(&task, &[]).await.unwrap();
    }

    let processor =
        Processor::builder(single_queue_config(2), broker.clone(), handler).build();
    processor.clone().start().await;

    wait_until("6 tasks done", || broker.done_count() == 6).await;
    processor.terminate().await;

    assert!(
        max_seen.load(Ordering::SeqCst) <= 2,
        "observed {} concurrent handlers",
        max_seen.load(Ordering::SeqCst)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_done_is_deferred_to_sync_conduit() {
    let broker = MemoryBroker::new();
    let client = Client::new(broker.clone() as Arc<dyn Broker>);

    let handler = HandlerFn::arc("noop", |_ctx: CancellationToken, _task: Task| async move {
        Ok(())
    });

    let (tx, mut rx) = sync_channel();
    broker.fail_next_done(1);

    let task = Task::new("noop", Payload::new());
    client.enqueue(&task, &[]).await.unwrap();

    let processor = Processor::builder(single_queue_config(1), broker.clone(), handler)
        .with_sync_conduit(tx)
        .build();
    processor.clone().start().await;

    let request = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no sync request within deadline")
        .expect("conduit closed");

    assert!(request.err_msg.contains("in-progress"));
    assert_eq!(broker.done_count(), 0);
    assert_eq!(broker.in_progress().len(), 1);

    // The syncer replays the exact failed call until it succeeds.
    (request.op)().await.expect("replay failed");
    assert_eq!(broker.done_count(), 1);
    assert!(broker.in_progress().is_empty());

    processor.terminate().await;
    assert_eq!(broker.pending_total(), 0);
}
