//! Pipeline counters shared by every connection of one dispatcher

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

#[derive(Debug, Default)]
pub struct Counters {
    inner: CachePadded<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    submitted: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    invalid_input: AtomicU64,
    failed: AtomicU64,
    callback_failures: AtomicU64,
    pool_evictions: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub submitted: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub invalid_input: u64,
    /// Conversions that started but could not complete
    pub failed: u64,
    pub callback_failures: u64,
    pub pool_evictions: u64,
}

impl Counters {
    pub fn record_submitted(&self) {
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frameflow_frames_submitted").increment(1);
    }

    pub fn record_delivered(&self) {
        self.inner.delivered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frameflow_frames_delivered").increment(1);
    }

    pub fn record_dropped(&self) {
        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frameflow_frames_dropped").increment(1);
    }

    pub fn record_invalid_input(&self) {
        self.inner.invalid_input.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frameflow_invalid_input").increment(1);
    }

    pub fn record_failed(&self) {
        self.inner.failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frameflow_conversions_failed").increment(1);
    }

    pub fn record_callback_failure(&self) {
        self.inner.callback_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frameflow_callback_failures").increment(1);
    }

    pub fn record_pool_eviction(&self) {
        self.inner.pool_evictions.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frameflow_pool_evictions").increment(1);
    }

    pub fn snapshot(&self) -> DispatcherStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        DispatcherStats {
            submitted: load(&self.inner.submitted),
            delivered: load(&self.inner.delivered),
            dropped: load(&self.inner.dropped),
            invalid_input: load(&self.inner.invalid_input),
            failed: load(&self.inner.failed),
            callback_failures: load(&self.inner.callback_failures),
            pool_evictions: load(&self.inner.pool_evictions),
        }
    }
}
