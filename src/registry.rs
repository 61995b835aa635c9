//! # Process-wide cancellation registry.
//!
//! [`Cancelations`] maps in-flight message ids to their cancellation
//! tokens. Entries are added when a worker starts a handler and removed
//! when the handler returns, success or not.
//!
//! The registry never owns a worker's lifetime; it is a lookup table used
//! by the shutdown drain (cancel everything) and by external callers
//! cancelling a single task by id. Share one instance between the
//! processor and any public cancel entry point.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Concurrent map from message id to cancellation token.
#[derive(Default)]
pub struct Cancelations {
    inner: DashMap<String, CancellationToken>,
}

impl Cancelations {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Registers the cancellation token for an in-flight message.
    pub fn add(&self, id: impl Into<String>, token: CancellationToken) {
        self.inner.insert(id.into(), token);
    }

    /// Removes the entry for `id`, if any.
    pub fn delete(&self, id: &str) {
        self.inner.remove(id);
    }

    /// Cancels the in-flight task with the given message id.
    ///
    /// Returns `true` if a matching entry existed. The entry itself is
    /// removed by the worker when the handler returns.
    pub fn cancel(&self, id: &str) -> bool {
        match self.inner.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Returns a snapshot of all registered tokens, suitable for
    /// iteration during shutdown.
    pub fn get_all(&self) -> Vec<CancellationToken> {
        self.inner.iter().map(|e| e.value().clone()).collect()
    }

    /// Number of in-flight entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if no task is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
