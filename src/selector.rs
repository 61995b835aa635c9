//! # Queue selection order for each dispatch tick.
//!
//! [`QueueSelector`] turns the configured queue/weight map into the
//! ordered list of queue names handed to
//! [`Broker::dequeue`](crate::broker::Broker::dequeue), which tries them
//! left to right.
//!
//! Weights are normalized by their GCD at construction to bound the size
//! of the weighted multiset. Strict mode always yields the same
//! descending-weight order and can starve low-priority queues; the default
//! weighted-random mode trades exactness for liveness, so every queue is
//! eventually first.

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;

pub(crate) struct QueueSelector {
    /// Queue name → normalized weight.
    weights: HashMap<String, u32>,
    /// Fixed order, present only in strict-priority mode.
    ordered: Option<Vec<String>>,
    /// Cached single-queue list (fast path, no per-tick allocation).
    single: Option<Vec<String>>,
}

impl QueueSelector {
    /// Builds a selector from the configured weights.
    ///
    /// Weights must be positive; callers normalize the map via
    /// [`Config::normalized`](crate::Config::normalized) first.
    pub(crate) fn new(queues: &HashMap<String, u32>, strict: bool) -> Self {
        let weights = normalize_weights(queues);
        let single = if weights.len() == 1 {
            Some(weights.keys().cloned().collect())
        } else {
            None
        };
        let ordered = if strict {
            Some(sort_by_weight(&weights))
        } else {
            None
        };
        Self {
            weights,
            ordered,
            single,
        }
    }

    /// Number of distinct configured queues.
    pub(crate) fn len(&self) -> usize {
        self.weights.len()
    }

    /// Returns the ordered queue list for the next dequeue attempt.
    pub(crate) fn queues(&self) -> Vec<String> {
        if let Some(single) = &self.single {
            return single.clone();
        }
        if let Some(ordered) = &self.ordered {
            return ordered.clone();
        }

        let mut names: Vec<&str> = Vec::new();
        for (name, weight) in &self.weights {
            for _ in 0..*weight {
                names.push(name);
            }
        }
        names.shuffle(&mut rand::rng());
        uniq(&names, self.weights.len())
    }
}

/// Dedupes `names` preserving first occurrence, stopping at `limit`.
fn uniq(names: &[&str], limit: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut res = Vec::with_capacity(limit);
    for name in names {
        if seen.insert(*name) {
            res.push((*name).to_string());
            if res.len() == limit {
                break;
            }
        }
    }
    res
}

/// Returns queue names sorted by descending weight.
///
/// Ties break on the name so the order is stable for the process lifetime.
fn sort_by_weight(weights: &HashMap<String, u32>) -> Vec<String> {
    let mut entries: Vec<(&String, u32)> = weights.iter().map(|(n, w)| (n, *w)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    entries.into_iter().map(|(n, _)| n.clone()).collect()
}

/// Divides all weights by their greatest common divisor.
fn normalize_weights(queues: &HashMap<String, u32>) -> HashMap<String, u32> {
    let d = queues.values().fold(0, |acc, w| gcd(acc, *w)).max(1);
    queues.iter().map(|(n, w)| (n.clone(), w / d)).collect()
}

fn gcd(mut x: u32, mut y: u32) -> u32 {
    while y > 0 {
        let r = x % y;
        x = y;
        y = r;
    }
    x
}
