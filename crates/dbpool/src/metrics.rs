//! Pool counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of the pool's lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Connections successfully opened.
    pub connections_created: u64,
    /// Connections closed for any reason.
    pub connections_closed: u64,
    /// Connections closed by the reaper for being idle too long. Also
    /// counted in `connections_closed`.
    pub connections_reaped: u64,
    /// Failed connect attempts.
    pub creation_failures: u64,
    /// Successful checkouts.
    pub checkouts_successful: u64,
    /// Checkouts that timed out.
    pub checkouts_failed: u64,
    /// Connections discarded by a failed liveness check.
    pub health_check_failures: u64,
    /// Total time callers spent waiting in checkout.
    pub total_wait_time: Duration,
}

impl PoolMetrics {
    /// Fraction of checkouts that succeeded. `1.0` before any checkout.
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            1.0
        } else {
            self.checkouts_successful as f64 / total as f64
        }
    }

    /// Mean wait per successful checkout.
    #[must_use]
    pub fn average_wait(&self) -> Duration {
        match u32::try_from(self.checkouts_successful) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_wait_time / n,
            Err(_) => Duration::ZERO,
        }
    }
}

/// Atomic counters updated concurrently by callers and background tasks.
#[derive(Debug, Default)]
pub(crate) struct AtomicPoolMetrics {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    connections_reaped: AtomicU64,
    creation_failures: AtomicU64,
    checkouts_successful: AtomicU64,
    checkouts_failed: AtomicU64,
    health_check_failures: AtomicU64,
    total_wait_micros: AtomicU64,
}

impl AtomicPoolMetrics {
    pub(crate) fn record_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reaped(&self) {
        self.connections_reaped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_creation_failure(&self) {
        self.creation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_checkout(&self, waited: Duration) {
        self.checkouts_successful.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(waited.as_micros()).unwrap_or(u64::MAX);
        self.total_wait_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.checkouts_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_health_check_failure(&self) {
        self.health_check_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PoolMetrics {
        PoolMetrics {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            connections_reaped: self.connections_reaped.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            checkouts_successful: self.checkouts_successful.load(Ordering::Relaxed),
            checkouts_failed: self.checkouts_failed.load(Ordering::Relaxed),
            health_check_failures: self.health_check_failures.load(Ordering::Relaxed),
            total_wait_time: Duration::from_micros(self.total_wait_micros.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_pool_metrics() {
        let metrics = AtomicPoolMetrics::default();

        metrics.record_created();
        metrics.record_created();
        metrics.record_checkout(Duration::from_millis(100));
        metrics.record_checkout(Duration::from_millis(200));
        metrics.record_reaped();
        metrics.record_closed();
        metrics.record_timeout();
        metrics.record_health_check_failure();
        metrics.record_creation_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_created, 2);
        assert_eq!(snapshot.connections_closed, 1);
        assert_eq!(snapshot.connections_reaped, 1);
        assert_eq!(snapshot.checkouts_successful, 2);
        assert_eq!(snapshot.checkouts_failed, 1);
        assert_eq!(snapshot.health_check_failures, 1);
        assert_eq!(snapshot.creation_failures, 1);
        assert_eq!(snapshot.total_wait_time, Duration::from_millis(300));
        assert_eq!(snapshot.average_wait(), Duration::from_millis(150));
    }

    #[test]
    fn test_checkout_success_rate() {
        assert!((PoolMetrics::default().checkout_success_rate() - 1.0).abs() < f64::EPSILON);

        let metrics = PoolMetrics {
            checkouts_successful: 3,
            checkouts_failed: 1,
            ..PoolMetrics::default()
        };
        assert!((metrics.checkout_success_rate() - 0.75).abs() < f64::EPSILON);
    }
}
