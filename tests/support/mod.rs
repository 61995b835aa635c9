//! Shared test support: an in-memory [`Broker`] with the five broker-side
//! sets, single-queue blocking dequeue, due-retry promotion (standing in
//! for the external scheduler), and fault injection for terminal
//! transitions.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use relayq::{Broker, BrokerError, TaskMessage};

#[derive(Default)]
struct Sets {
    pending: HashMap<String, VecDeque<TaskMessage>>,
    in_progress: Vec<TaskMessage>,
    scheduled: Vec<(TaskMessage, DateTime<Utc>)>,
    retry: Vec<(TaskMessage, DateTime<Utc>)>,
    dead: Vec<(TaskMessage, DateTime<Utc>)>,
}

/// In-memory broker with atomic (mutex-serialized) operations.
pub struct MemoryBroker {
    sets: Mutex<Sets>,
    notify: Notify,
    done_count: AtomicUsize,
    fail_done: AtomicUsize,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sets: Mutex::new(Sets::default()),
            notify: Notify::new(),
            done_count: AtomicUsize::new(0),
            fail_done: AtomicUsize::new(0),
        })
    }

    /// Makes the next `n` calls to `done` fail with a transient error.
    pub fn fail_next_done(&self, n: usize) {
        self.fail_done.store(n, Ordering::SeqCst);
    }

    pub fn done_count(&self) -> usize {
        self.done_count.load(Ordering::SeqCst)
    }

    pub fn pending(&self, queue: &str) -> Vec<TaskMessage> {
        let sets = self.lock();
        sets.pending
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn pending_total(&self) -> usize {
        self.lock().pending.values().map(|q| q.len()).sum()
    }

    pub fn in_progress(&self) -> Vec<TaskMessage> {
        self.lock().in_progress.clone()
    }

    pub fn retry_set(&self) -> Vec<TaskMessage> {
        self.lock().retry.iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn dead(&self) -> Vec<TaskMessage> {
        self.lock().dead.iter().map(|(m, _)| m.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Sets> {
        match self.sets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Promotes due scheduled/retry messages, then pops the head of the
    /// first non-empty queue into the in-progress set.
    fn try_pop(&self, queues: &[String]) -> Option<TaskMessage> {
        let mut sets = self.lock();
        let now = Utc::now();

        let due: Vec<TaskMessage> = {
            let mut due = Vec::new();
            sets.retry.retain(|(m, at)| {
                if *at <= now {
                    due.push(m.clone());
                    false
                } else {
                    true
                }
            });
            sets.scheduled.retain(|(m, at)| {
                if *at <= now {
                    due.push(m.clone());
                    false
                } else {
                    true
                }
            });
            due
        };
        for msg in due {
            sets.pending
                .entry(msg.queue.clone())
                .or_default()
                .push_back(msg);
        }

        for queue in queues {
            if let Some(msg) = sets.pending.get_mut(queue).and_then(|q| q.pop_front()) {
                sets.in_progress.push(msg.clone());
                return Some(msg);
            }
        }
        None
    }

    fn remove_in_progress(sets: &mut Sets, id: &str) {
        sets.in_progress.retain(|m| m.id != id);
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, msg: &TaskMessage) -> Result<(), BrokerError> {
        let mut sets = self.lock();
        sets.pending
            .entry(msg.queue.clone())
            .or_default()
            .push_back(msg.clone());
        drop(sets);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn schedule(
        &self,
        msg: &TaskMessage,
        process_at: DateTime<Utc>,
    ) -> Result<(), BrokerError> {
        self.lock().scheduled.push((msg.clone(), process_at));
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, queues: &[String]) -> Result<TaskMessage, BrokerError> {
        if queues.len() == 1 {
            // Single-queue dequeue blocks broker-side until work arrives.
            // The waiter registers before the emptiness check so a
            // concurrent enqueue cannot slip between them unnoticed.
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if let Some(msg) = self.try_pop(queues) {
                    return Ok(msg);
                }
                notified.await;
            }
        }
        self.try_pop(queues).ok_or(BrokerError::NoProcessableTask)
    }

    async fn requeue(&self, msg: &TaskMessage) -> Result<(), BrokerError> {
        let mut sets = self.lock();
        Self::remove_in_progress(&mut sets, &msg.id);
        sets.pending
            .entry(msg.queue.clone())
            .or_default()
            .push_front(msg.clone());
        drop(sets);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn done(&self, msg: &TaskMessage) -> Result<(), BrokerError> {
        if self
            .fail_done
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BrokerError::unavailable("injected done failure"));
        }
        let mut sets = self.lock();
        Self::remove_in_progress(&mut sets, &msg.id);
        drop(sets);
        self.done_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn retry(
        &self,
        msg: &TaskMessage,
        retry_at: DateTime<Utc>,
        err_msg: &str,
    ) -> Result<(), BrokerError> {
        let mut updated = msg.clone();
        updated.retried += 1;
        updated.error_msg = err_msg.to_string();

        let mut sets = self.lock();
        Self::remove_in_progress(&mut sets, &msg.id);
        sets.retry.push((updated, retry_at));
        drop(sets);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn kill(&self, msg: &TaskMessage, err_msg: &str) -> Result<(), BrokerError> {
        let mut updated = msg.clone();
        updated.error_msg = err_msg.to_string();

        let mut sets = self.lock();
        Self::remove_in_progress(&mut sets, &msg.id);
        sets.dead.push((updated, Utc::now()));
        Ok(())
    }

    async fn requeue_all(&self) -> Result<u64, BrokerError> {
        let mut sets = self.lock();
        let moved = std::mem::take(&mut sets.in_progress);
        let count = moved.len() as u64;
        for msg in moved {
            sets.pending
                .entry(msg.queue.clone())
                .or_default()
                .push_front(msg);
        }
        drop(sets);
        self.notify.notify_waiters();
        Ok(count)
    }
}

/// Polls `cond` every 10ms until it holds, failing the test after 5s.
pub async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Duration::from_secs(5);
    let result = tokio::time::timeout(deadline, async {
        loop {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for: {what}");
}
