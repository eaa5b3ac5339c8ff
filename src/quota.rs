//! Anonymous usage quota keyed by client identity.
//!
//! Counters live in a sharded concurrent map: increments for the same
//! identity are serialized by the entry lock, increments for different
//! identities proceed independently. The entry lock is never held across an
//! await point.
//!
//! Without a window, counters only reset on process restart. With a window,
//! a counter restarts once its window has elapsed and a background sweep
//! evicts expired entries so the map stays bounded by recent traffic.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of admitting one anonymous request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Count after this request was recorded.
    pub current_count: u64,
}

#[derive(Debug)]
struct Counter {
    count: u64,
    window_start: Instant,
}

/// Per-identity request counters.
#[derive(Debug)]
pub struct QuotaTracker {
    counters: DashMap<String, Counter>,
    limit: u64,
    window: Option<Duration>,
}

impl QuotaTracker {
    pub fn new(limit: u64, window: Option<Duration>) -> Self {
        Self {
            counters: DashMap::new(),
            limit,
            window,
        }
    }

    /// Record a request from `identity` and decide whether it may proceed.
    ///
    /// The counter is incremented unconditionally; the request is allowed
    /// while the new count does not exceed the limit.
    pub fn admit(&self, identity: &str) -> Admission {
        self.admit_at(identity, Instant::now())
    }

    pub(crate) fn admit_at(&self, identity: &str, now: Instant) -> Admission {
        let mut counter = self
            .counters
            .entry(identity.to_string())
            .or_insert_with(|| Counter {
                count: 0,
                window_start: now,
            });

        if let Some(window) = self.window {
            if now.saturating_duration_since(counter.window_start) >= window {
                counter.count = 0;
                counter.window_start = now;
            }
        }

        counter.count = counter.count.saturating_add(1);
        let current_count = counter.count;
        drop(counter);

        Admission {
            allowed: current_count <= self.limit,
            current_count,
        }
    }

    /// Current count for `identity` (0 if never seen).
    pub fn count(&self, identity: &str) -> u64 {
        self.counters.get(identity).map(|c| c.count).unwrap_or(0)
    }

    /// Number of identities currently tracked.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Drop counters whose window has elapsed. Returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        self.prune_expired_at(Instant::now())
    }

    pub(crate) fn prune_expired_at(&self, now: Instant) -> usize {
        let Some(window) = self.window else {
            return 0;
        };
        let before = self.counters.len();
        self.counters
            .retain(|_, c| now.saturating_duration_since(c.window_start) < window);
        before.saturating_sub(self.counters.len())
    }

    /// Periodically evict expired counters until `cancel` fires.
    ///
    /// Returns `None` when no window is configured (nothing ever expires).
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let window = self.window?;
        let tracker = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(window);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = tracker.prune_expired();
                        if removed > 0 {
                            debug!(removed, remaining = tracker.len(), "Evicted expired quota counters");
                        }
                    }
                }
            }
        }))
    }
}
