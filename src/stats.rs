//! Engine usage counters.
//!
//! Tracks how many embedding calls actually hit the provider (cache hits do
//! not count) so quota and observability tooling can watch spend. Counters
//! are scoped to an [`Engine`](crate::sync::Engine) instance, not the
//! process, so independent engines — and tests — do not share state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Snapshot of the usage counters.
#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub embedding_calls: u64,
    pub uptime_seconds: u64,
}

/// Shared counters, cheap to bump from concurrent embedding workers.
pub struct UsageCounters {
    embedding_calls: AtomicU64,
    started_at: Instant,
}

impl UsageCounters {
    pub fn new() -> Self {
        Self {
            embedding_calls: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Record one provider call (an embedding cache miss).
    pub fn record_embedding(&self) {
        self.embedding_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn embedding_calls(&self) -> u64 {
        self.embedding_calls.load(Ordering::Relaxed)
    }

    /// Reset the call counter (the uptime clock keeps running).
    pub fn reset(&self) {
        self.embedding_calls.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageStats {
        UsageStats {
            embedding_calls: self.embedding_calls(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }
}

impl Default for UsageCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_resets() {
        let counters = UsageCounters::new();
        counters.record_embedding();
        counters.record_embedding();
        assert_eq!(counters.embedding_calls(), 2);

        counters.reset();
        assert_eq!(counters.embedding_calls(), 0);
    }
}
