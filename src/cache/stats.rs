//! Cache Statistics Module
//!
//! Tracks keyed-cache activity: hits, misses, load attempts and batch expirations.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache activity counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of `get` calls that found an existing entry
    pub hits: u64,
    /// Number of `get` calls that created a new entry
    pub misses: u64,
    /// Number of load attempts (initial loads and reloads) started through `get`
    pub loads: u64,
    /// Number of entries removed by expiry sweeps
    pub expirations: u64,
    /// Current number of entries in the cache, loading ones included
    pub total_entries: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    // == Record Hit ==
    /// Counts a `get` that found an existing entry.
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    // == Record Miss ==
    /// Counts a `get` that had to create its entry.
    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    // == Record Load ==
    /// Counts a load attempt or reload started by `get`.
    pub fn record_load(&mut self) {
        self.loads += 1;
    }

    // == Record Expirations ==
    /// Adds entries removed by one expiry sweep.
    pub fn record_expirations(&mut self, count: u64) {
        self.expirations += count;
    }

    // == Total Entries ==
    /// Updates the current entry count.
    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = CacheStats::new();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.loads, 0);
        assert_eq!(stats.expirations, 0);
        assert_eq!(stats.total_entries, 0);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let mut stats = CacheStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert_eq!(stats.hit_rate(), 0.75);
    }

    #[test]
    fn test_record_expirations_accumulates() {
        let mut stats = CacheStats::new();
        stats.record_expirations(3);
        stats.record_expirations(2);
        assert_eq!(stats.expirations, 5);
    }

    #[test]
    fn test_serializes_to_json() {
        let mut stats = CacheStats::new();
        stats.record_miss();
        stats.record_load();
        stats.set_total_entries(1);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["misses"], 1);
        assert_eq!(json["loads"], 1);
        assert_eq!(json["total_entries"], 1);
    }
}
