//! Repository metrics.
//!
//! [`RepositoryMetrics`] provides lock-free atomic counters updated by the
//! publish path and the consumption loop, readable at any time as a
//! [`MetricsSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for repository activity.
#[derive(Debug, Default)]
pub struct RepositoryMetrics {
    /// Records applied to the cache.
    pub records_applied: AtomicU64,
    /// Records skipped because their offset was already applied.
    pub records_stale: AtomicU64,
    /// Records dropped because their payload could not be decoded.
    pub decode_errors: AtomicU64,
    /// Failed polls.
    pub poll_errors: AtomicU64,
    /// Non-empty batches returned by polls.
    pub batches_polled: AtomicU64,
    /// Payload bytes returned by polls.
    pub bytes_polled: AtomicU64,
    /// States acknowledged by the transport.
    pub states_published: AtomicU64,
    /// Publishes rejected by the transport.
    pub publish_errors: AtomicU64,
}

impl RepositoryMetrics {
    /// Creates a new metrics instance with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a polled batch of `records` records totaling `bytes`.
    pub fn record_poll(&self, records: u64, bytes: u64) {
        if records > 0 {
            self.batches_polled.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_polled.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a state applied to the cache.
    pub fn record_applied(&self) {
        self.records_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a record skipped as already applied.
    pub fn record_stale(&self) {
        self.records_stale.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an undecodable record.
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed poll.
    pub fn record_poll_error(&self) {
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an acknowledged publish.
    pub fn record_published(&self) {
        self.states_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a rejected publish.
    pub fn record_publish_error(&self) {
        self.publish_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_applied: self.records_applied.load(Ordering::Relaxed),
            records_stale: self.records_stale.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
            batches_polled: self.batches_polled.load(Ordering::Relaxed),
            bytes_polled: self.bytes_polled.load(Ordering::Relaxed),
            states_published: self.states_published.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RepositoryMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub records_applied: u64,
    pub records_stale: u64,
    pub decode_errors: u64,
    pub poll_errors: u64,
    pub batches_polled: u64,
    pub bytes_polled: u64,
    pub states_published: u64,
    pub publish_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_zeros() {
        assert_eq!(RepositoryMetrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_record_poll() {
        let m = RepositoryMetrics::new();
        m.record_poll(3, 120);
        m.record_poll(0, 0);
        m.record_poll(2, 80);

        let s = m.snapshot();
        assert_eq!(s.batches_polled, 2);
        assert_eq!(s.bytes_polled, 200);
    }

    #[test]
    fn test_counters() {
        let m = RepositoryMetrics::new();
        m.record_applied();
        m.record_applied();
        m.record_stale();
        m.record_decode_error();
        m.record_poll_error();
        m.record_published();
        m.record_publish_error();

        let s = m.snapshot();
        assert_eq!(s.records_applied, 2);
        assert_eq!(s.records_stale, 1);
        assert_eq!(s.decode_errors, 1);
        assert_eq!(s.poll_errors, 1);
        assert_eq!(s.states_published, 1);
        assert_eq!(s.publish_errors, 1);
    }
}
