//! Cache statistics for monitoring

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared by the resolver and the coordinator
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    not_found: AtomicU64,
    fresh_skips: AtomicU64,
    coalesced: AtomicU64,
    refreshes: AtomicU64,
    api_calls: AtomicU64,
    rate_limited: AtomicU64,
    refresh_failures: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fresh_skip(&self) {
        self.fresh_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_api_call(&self) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refresh_failure(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entries: usize, last_refresh: Option<DateTime<Utc>>) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            fresh_skips: self.fresh_skips.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            api_calls: self.api_calls.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            entries,
            last_refresh,
        }
    }
}

/// Point-in-time view of the cache counters
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Misses that stayed misses after a refresh
    pub not_found: u64,
    /// Refresh requests answered by a fresh store without locking
    pub fresh_skips: u64,
    /// Refresh requests satisfied by another caller's refresh
    pub coalesced: u64,
    /// Successful snapshot replacements
    pub refreshes: u64,
    pub api_calls: u64,
    pub rate_limited: u64,
    pub refresh_failures: u64,
    pub entries: usize,
    pub last_refresh: Option<DateTime<Utc>>,
}

impl CacheStats {
    /// Hit rate in percent, 0 when nothing has been looked up yet
    pub fn hit_rate(&self) -> u32 {
        let total = self.hits + self.misses;
        if total > 0 {
            (self.hits as f32 / total as f32 * 100.0) as u32
        } else {
            0
        }
    }
}
