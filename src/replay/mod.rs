//! Bounded replay cache for inbound webhook ingress (spec §5 "Shared
//! resources"): evicts by size and age so a slow-draining carrier retry
//! storm cannot grow this without bound.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashSet;

const DEFAULT_CAPACITY: usize = 10_000;
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(5 * 60);

struct OrderedEntry {
    key: String,
    seen_at: Instant,
}

/// A nonce/signature cache used to reject webhook deliveries already
/// processed once. Insertion order is tracked separately from the set so
/// eviction is O(1) amortized rather than requiring a scan.
pub struct ReplayCache {
    seen: DashSet<String>,
    order: Mutex<VecDeque<OrderedEntry>>,
    capacity: usize,
    max_age: Duration,
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_MAX_AGE)
    }
}

impl ReplayCache {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            seen: DashSet::new(),
            order: Mutex::new(VecDeque::new()),
            capacity,
            max_age,
        }
    }

    /// Returns `true` if `key` had not been seen before (and records it);
    /// `false` if this is a replay.
    pub fn check_and_record(&self, key: &str) -> bool {
        self.evict_stale();
        if !self.seen.insert(key.to_owned()) {
            return false;
        }
        let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        order.push_back(OrderedEntry {
            key: key.to_owned(),
            seen_at: Instant::now(),
        });
        if order.len() > self.capacity {
            if let Some(evicted) = order.pop_front() {
                self.seen.remove(&evicted.key);
            }
        }
        true
    }

    fn evict_stale(&self) {
        let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(front) = order.front() {
            if front.seen_at.elapsed() > self.max_age {
                let evicted = order.pop_front().unwrap();
                self.seen.remove(&evicted.key);
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
