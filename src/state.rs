//! # Tracks currently executing workers.
//!
//! [`ProcessState`] records `(message, start_time)` for every worker the
//! processor has admitted, for observability (heartbeat reporters, admin
//! introspection). The dispatch loop adds an entry at admission; the
//! worker removes it when it exits, including the forced-quit path.
//!
//! The processor consumes this state, it does not own it: inject a shared
//! instance to expose live worker stats to the surrounding server.

use std::time::SystemTime;

use dashmap::DashMap;

use crate::message::TaskMessage;

/// Stats for one in-flight worker.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    /// The message being executed.
    pub msg: TaskMessage,
    /// When execution was admitted.
    pub started: SystemTime,
}

/// Concurrent map of live worker stats, keyed by message id.
#[derive(Default)]
pub struct ProcessState {
    workers: DashMap<String, WorkerInfo>,
}

impl ProcessState {
    /// Creates empty state.
    pub fn new() -> Self {
        Self {
            workers: DashMap::new(),
        }
    }

    /// Records that a worker started executing `msg` at `started`.
    pub fn add_worker_stats(&self, msg: &TaskMessage, started: SystemTime) {
        self.workers.insert(
            msg.id.clone(),
            WorkerInfo {
                msg: msg.clone(),
                started,
            },
        );
    }

    /// Removes the stats entry for the given message id.
    pub fn delete_worker_stats(&self, id: &str) {
        self.workers.remove(id);
    }

    /// Returns a snapshot of all live worker stats.
    pub fn worker_stats(&self) -> Vec<WorkerInfo> {
        self.workers.iter().map(|e| e.value().clone()).collect()
    }

    /// Number of workers currently executing.
    pub fn active(&self) -> usize {
        self.workers.len()
    }
}
