//! # Processor configuration.
//!
//! [`Config`] defines the processor's behavior: worker concurrency, the
//! queue/weight map, strict-priority selection, the graceful-shutdown
//! window, and the default retry policy.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use relayq::Config;
//!
//! let mut cfg = Config::default();
//! cfg.concurrency = 4;
//! cfg.queues = [("critical".into(), 6), ("default".into(), 3), ("low".into(), 1)].into();
//! cfg.strict_priority = false;
//! cfg.shutdown_timeout = Duration::from_secs(8);
//!
//! let cfg = cfg.normalized();
//! assert_eq!(cfg.concurrency, 4);
//! ```

use std::collections::HashMap;
use std::time::Duration;

use crate::policies::RetryPolicy;

/// Name of the queue used when none is specified.
pub const DEFAULT_QUEUE_NAME: &str = "default";

/// Global configuration for the processor.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of concurrently executing workers.
    pub concurrency: usize,
    /// Queue name → positive priority weight. Names are lowercased.
    pub queues: HashMap<String, u32>,
    /// If true, queues are always tried in descending-weight order.
    /// Risks starving low-priority queues under sustained load.
    pub strict_priority: bool,
    /// Graceful drain window before in-flight workers are force-quit.
    pub shutdown_timeout: Duration,
    /// Sleep between empty polls when more than one queue is configured.
    pub poll_interval: Duration,
    /// Capacity of the event bus channel.
    pub bus_capacity: usize,
    /// Default retry-delay policy (overridable per processor with a
    /// custom delay function).
    pub retry: RetryPolicy,
}

impl Default for Config {
    /// Provides a default configuration:
    /// - `concurrency` = available parallelism
    /// - `queues = {"default": 1}`
    /// - `strict_priority = false`
    /// - `shutdown_timeout = 8s`
    /// - `poll_interval = 1s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            queues: HashMap::from([(DEFAULT_QUEUE_NAME.to_string(), 1)]),
            strict_priority: false,
            shutdown_timeout: Duration::from_secs(8),
            poll_interval: Duration::from_secs(1),
            bus_capacity: 1024,
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Returns a copy with invalid settings coerced into usable ones:
    /// concurrency clamped to at least 1, queue names lowercased,
    /// zero-weight queues dropped, and an empty queue map replaced by
    /// `{"default": 1}`.
    pub fn normalized(mut self) -> Self {
        self.concurrency = self.concurrency.max(1);
        self.queues = self
            .queues
            .into_iter()
            .filter(|(_, w)| *w > 0)
            .map(|(name, w)| (name.to_lowercase(), w))
            .collect();
        if self.queues.is_empty() {
            self.queues
                .insert(DEFAULT_QUEUE_NAME.to_string(), 1);
        }
        self
    }
}
