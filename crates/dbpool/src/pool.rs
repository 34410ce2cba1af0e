//! Connection pool implementation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::config::{BackendConfig, PoolConfig};
use crate::connection::PooledConnection;
use crate::error::PoolError;
use crate::inner::PoolInner;
use crate::lifecycle::ConnectionManager;
use crate::metrics::PoolMetrics;
use crate::{producer, reaper};

/// A bounded pool of reusable backend connections.
///
/// The pool opens `min_connections` connections at startup and keeps them
/// in a FIFO idle queue. Callers borrow with [`get`](Self::get) and the
/// lease returns the connection when dropped. Two background tasks run for
/// the lifetime of the pool: a producer that opens connections when callers
/// are waiting (up to `max_connections`), and a reaper that closes
/// connections idle for longer than `idle_timeout` (never below
/// `min_connections`).
///
/// Share the pool between tasks with an `Arc<Pool<M>>`. Dropping the pool
/// stops the background tasks and closes every idle connection on the
/// current runtime without waiting; [`close`](Self::close) waits for the
/// closes to finish.
pub struct Pool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<M: ConnectionManager> Pool<M> {
    /// Create a pool builder around a connection manager.
    pub fn builder(manager: M) -> PoolBuilder<M> {
        PoolBuilder::new(manager)
    }

    /// Create a new pool.
    ///
    /// Validates both configurations, opens the initial batch of
    /// `min_connections` connections and starts the background tasks on the
    /// current Tokio runtime. If any initial connect fails, the connections
    /// already opened are closed and the error is returned.
    pub async fn new(
        config: PoolConfig,
        backend: BackendConfig,
        manager: M,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        backend.validate()?;

        let inner = Arc::new(PoolInner::new(manager, config, backend));
        let min = inner.config.min_connections;

        let mut initial = Vec::with_capacity(min as usize);
        for _ in 0..min {
            match inner.open_connection().await {
                Ok(entry) => initial.push(entry),
                Err(e) => {
                    tracing::error!(error = %e, "failed to open initial pool connections");
                    for entry in initial {
                        inner.close_connection(entry).await;
                    }
                    return Err(e);
                }
            }
        }

        {
            let mut state = inner.state.lock();
            state.live = min;
            state.idle.extend(initial);
        }

        let tasks = vec![
            tokio::spawn(producer::run(Arc::clone(&inner))),
            tokio::spawn(reaper::run(Arc::clone(&inner))),
        ];

        tracing::info!(
            min_connections = min,
            max_connections = inner.config.max_connections,
            backend = %inner.backend.address(),
            "connection pool started"
        );

        Ok(Self {
            inner,
            tasks: Mutex::new(tasks),
        })
    }

    /// Get a connection from the pool.
    ///
    /// Returns the oldest idle connection that passes the liveness check.
    /// Stale connections found on the way are closed and the next one is
    /// tried. If the queue is empty the producer is asked for a new
    /// connection and the call waits, up to `connection_timeout` in total,
    /// for one to become available.
    ///
    /// # Errors
    ///
    /// [`PoolError::AcquisitionTimeout`] if no connection became available
    /// in time, [`PoolError::PoolClosed`] if the pool is closed.
    pub async fn get(&self) -> Result<PooledConnection<M>, PoolError> {
        tracing::trace!("acquiring connection from pool");
        self.inner.acquire(self.inner.config.connection_timeout).await
    }

    /// Get a connection, waiting at most `timeout` instead of the configured
    /// `connection_timeout`.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<PooledConnection<M>, PoolError> {
        self.inner.acquire(timeout).await
    }

    /// Take an idle connection without waiting.
    ///
    /// Returns `Ok(None)` when no connection is idle. The liveness check is
    /// skipped.
    pub fn try_get(&self) -> Result<Option<PooledConnection<M>>, PoolError> {
        self.inner.try_acquire()
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        let idle = state.idle_count();
        PoolStatus {
            total: state.live,
            available: idle,
            in_use: state.live.saturating_sub(idle),
            waiting: state.waiting,
            max: self.inner.config.max_connections,
        }
    }

    /// Get the pool's lifetime counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics.snapshot()
    }

    /// Close the pool.
    ///
    /// Every idle connection is closed through the manager and the
    /// background tasks are stopped. Waiting callers get
    /// [`PoolError::PoolClosed`].
    ///
    /// Leases still held stay counted in [`status`](Self::status) until
    /// they come back, so `total` only drops to the number of outstanding
    /// leases here, not to zero. Each returned lease is closed and
    /// uncounted; the count reaches zero once the last one is returned.
    pub async fn close(&self) {
        let drained: Vec<_> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.live = state.live.saturating_sub(drained.len() as u32);
            drained
        };

        self.inner.shutdown.cancel();
        self.inner.available.notify_waiters();

        for entry in drained {
            self.inner.close_connection(entry).await;
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "pool background task panicked");
                }
            }
        }

        tracing::info!("connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the backend connection parameters.
    #[must_use]
    pub fn backend(&self) -> &BackendConfig {
        &self.inner.backend
    }

    /// Get the connection manager.
    #[must_use]
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }
}

impl<M: ConnectionManager> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("backend", &self.inner.backend.address())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl<M: ConnectionManager> Drop for Pool<M> {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }

        let drained: Vec<_> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.live = state.live.saturating_sub(drained.len() as u32);
            drained
        };
        self.inner.available.notify_waiters();
        self.inner.close_on_drop(drained);
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Total number of connections, idle and in use.
    pub total: u32,
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently in use.
    pub in_use: u32,
    /// Callers currently waiting for a connection.
    pub waiting: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

impl PoolStatus {
    /// Share of the ceiling currently leased out, in percent.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        f64::from(self.in_use) / f64::from(self.max) * 100.0
    }
}

/// Builder for [`Pool`].
pub struct PoolBuilder<M: ConnectionManager> {
    manager: M,
    config: PoolConfig,
    backend: BackendConfig,
}

impl<M: ConnectionManager> PoolBuilder<M> {
    /// Create a builder with default configuration.
    pub fn new(manager: M) -> Self {
        Self {
            manager,
            config: PoolConfig::default(),
            backend: BackendConfig::default(),
        }
    }

    /// Set the backend connection parameters.
    #[must_use]
    pub fn backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    /// Replace the whole pool configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of connections opened at startup.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.config.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_lifetime = Some(lifetime);
        self
    }

    /// Enable or disable testing connections on checkout.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.config.test_on_checkout = enabled;
        self
    }

    /// Enable or disable testing connections on checkin.
    #[must_use]
    pub fn test_on_checkin(mut self, enabled: bool) -> Self {
        self.config.test_on_checkin = enabled;
        self
    }

    /// Set the reaper wake-up interval.
    #[must_use]
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.config.reap_interval = Some(interval);
        self
    }

    /// Set the producer back-off after a failed connect.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Build the pool.
    pub async fn build(self) -> Result<Pool<M>, PoolError> {
        Pool::new(self.config, self.backend, self.manager).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_utilization() {
        let status = PoolStatus {
            total: 4,
            available: 1,
            in_use: 3,
            waiting: 0,
            max: 10,
        };
        assert!((status.utilization() - 30.0).abs() < f64::EPSILON);

        let empty = PoolStatus {
            total: 0,
            available: 0,
            in_use: 0,
            waiting: 0,
            max: 0,
        };
        assert!(empty.utilization().abs() < f64::EPSILON);
    }
}
