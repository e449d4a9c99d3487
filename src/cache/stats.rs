//! Fetch-Through Statistics Module
//!
//! Tracks how often a fetch-through fetcher served known content versus
//! going to the upstream source.

use serde::Serialize;

// == Fetch Stats ==
/// Tracks fetch-through outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    /// Fetches answered from known content after an `Unchanged` staleness check
    pub hits: u64,
    /// Fetches that went to the upstream source
    pub misses: u64,
    /// Upstream invocations that failed
    pub upstream_failures: u64,
}

impl FetchStats {
    // == Constructor ==
    /// Creates a new FetchStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if nothing has been fetched.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_upstream_failure(&mut self) {
        self.upstream_failures += 1;
    }
}
