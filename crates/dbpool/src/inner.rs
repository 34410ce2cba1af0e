//! Shared pool state and the checkout/checkin protocol.
//!
//! Every piece of mutable state lives in [`PoolState`] behind one mutex.
//! The mutex is never held across an `.await`: connects, liveness checks
//! and closes all run with the lock released and re-acquire it to publish
//! their result.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{BackendConfig, PoolConfig};
use crate::connection::PooledConnection;
use crate::error::PoolError;
use crate::lifecycle::{ConnectionManager, ConnectionMetadata};
use crate::metrics::AtomicPoolMetrics;

/// A connection together with the metadata the pool tracks for it.
pub(crate) struct PoolEntry<C> {
    pub(crate) conn: C,
    pub(crate) meta: ConnectionMetadata,
}

impl<C> PoolEntry<C> {
    fn new(conn: C, id: u64) -> Self {
        Self {
            conn,
            meta: ConnectionMetadata::new(id),
        }
    }
}

/// Mutable state guarded by [`PoolInner::state`].
pub(crate) struct PoolState<C> {
    /// Idle connections, oldest-returned at the front.
    pub(crate) idle: VecDeque<PoolEntry<C>>,
    /// Connections in existence, idle and leased.
    pub(crate) live: u32,
    /// Callers currently blocked in checkout.
    pub(crate) waiting: u32,
    pub(crate) closed: bool,
}

impl<C> PoolState<C> {
    fn new(capacity: usize) -> Self {
        Self {
            idle: VecDeque::with_capacity(capacity),
            live: 0,
            waiting: 0,
            closed: false,
        }
    }

    pub(crate) fn idle_count(&self) -> u32 {
        u32::try_from(self.idle.len()).unwrap_or(u32::MAX)
    }

    /// Whether the producer should open another connection: there is room
    /// under the ceiling, and either the floor is not met or more callers
    /// are waiting than there are idle connections to serve them.
    pub(crate) fn needs_connection(&self, min: u32, max: u32) -> bool {
        !self.closed && self.live < max && (self.live < min || self.waiting > self.idle_count())
    }
}

pub(crate) struct PoolInner<M: ConnectionManager> {
    pub(crate) manager: M,
    pub(crate) config: PoolConfig,
    pub(crate) backend: BackendConfig,
    pub(crate) state: Mutex<PoolState<M::Connection>>,
    /// Woken (all waiters) whenever a connection may have become available.
    pub(crate) available: Notify,
    /// Woken (single permit) whenever the producer may have work to do.
    pub(crate) demand: Notify,
    pub(crate) metrics: AtomicPoolMetrics,
    pub(crate) shutdown: CancellationToken,
    next_id: AtomicU64,
}

impl<M: ConnectionManager> PoolInner<M> {
    pub(crate) fn new(manager: M, config: PoolConfig, backend: BackendConfig) -> Self {
        let capacity = config.max_connections as usize;
        Self {
            manager,
            config,
            backend,
            state: Mutex::new(PoolState::new(capacity)),
            available: Notify::new(),
            demand: Notify::new(),
            metrics: AtomicPoolMetrics::default(),
            shutdown: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Open one connection through the manager, honoring the backend
    /// connect timeout. Does not touch the live count.
    pub(crate) async fn open_connection(&self) -> Result<PoolEntry<M::Connection>, PoolError> {
        let connect = self.manager.connect(&self.backend);
        let result = if self.backend.connect_timeout.is_zero() {
            Ok(connect.await)
        } else {
            tokio::time::timeout(self.backend.connect_timeout, connect).await
        };

        let conn = match result {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                self.metrics.record_creation_failure();
                return Err(PoolError::ConnectionCreation(e.to_string()));
            }
            Err(_) => {
                self.metrics.record_creation_failure();
                return Err(PoolError::ConnectionCreation(format!(
                    "connect to {} timed out after {:?}",
                    self.backend.address(),
                    self.backend.connect_timeout
                )));
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_created();
        tracing::debug!(connection_id = id, backend = %self.backend.address(), "opened connection");
        Ok(PoolEntry::new(conn, id))
    }

    /// Publish a freshly opened connection. Rejected (and closed) if the
    /// pool shut down or reached its ceiling while the connect was running.
    pub(crate) async fn add_idle(&self, entry: PoolEntry<M::Connection>) {
        let rejected = {
            let mut state = self.state.lock();
            if state.closed || state.live >= self.config.max_connections {
                Some(entry)
            } else {
                state.idle.push_back(entry);
                state.live += 1;
                None
            }
        };

        match rejected {
            Some(entry) => self.close_connection(entry).await,
            None => self.available.notify_waiters(),
        }
    }

    /// Borrow a connection, waiting until `timeout` has elapsed in total.
    ///
    /// The deadline covers everything: waiting for a connection, checking it,
    /// and skipping stale ones.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<PooledConnection<M>, PoolError> {
        let start = Instant::now();
        let deadline = start + timeout;

        loop {
            // Register interest before inspecting the queue so a checkin
            // racing with the check below still wakes us.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let popped = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(PoolError::PoolClosed);
                }
                state.idle.pop_front()
            };

            if let Some(entry) = popped {
                let lease = PooledConnection::new(Arc::clone(self), entry);
                match self.validate_checkout(lease, deadline).await {
                    Checkout::Ready(lease) => {
                        self.metrics.record_checkout(start.elapsed());
                        tracing::trace!(connection_id = lease.metadata().id, "connection checked out");
                        return Ok(lease);
                    }
                    Checkout::Stale if Instant::now() < deadline => continue,
                    Checkout::Stale | Checkout::DeadlinePassed => {
                        return Err(self.timed_out(timeout));
                    }
                }
            }

            let _waiting = WaitRegistration::new(self);
            if tokio::time::timeout_at(deadline, notified.as_mut())
                .await
                .is_err()
            {
                return Err(self.timed_out(timeout));
            }
        }
    }

    fn timed_out(&self, timeout: Duration) -> PoolError {
        self.metrics.record_timeout();
        tracing::debug!(?timeout, "timed out waiting for a connection");
        PoolError::AcquisitionTimeout(timeout)
    }

    /// Pop the oldest idle connection without waiting or checking.
    pub(crate) fn try_acquire(self: &Arc<Self>) -> Result<Option<PooledConnection<M>>, PoolError> {
        let popped = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PoolError::PoolClosed);
            }
            state.idle.pop_front()
        };

        Ok(popped.map(|entry| {
            self.metrics.record_checkout(Duration::ZERO);
            PooledConnection::new(Arc::clone(self), entry)
        }))
    }

    /// Check a connection that was just popped. The lease already owns the
    /// entry, so a check cut short by the deadline (or a caller giving up
    /// mid-check) returns it through drop.
    async fn validate_checkout(
        &self,
        mut lease: PooledConnection<M>,
        deadline: Instant,
    ) -> Checkout<M> {
        let id = lease.metadata().id;

        if lease.metadata().is_expired(self.config.max_lifetime) {
            tracing::debug!(connection_id = id, "discarding connection past max lifetime");
            lease.discard().await;
            return Checkout::Stale;
        }

        if !self.config.test_on_checkout {
            return Checkout::Ready(lease);
        }

        let checked = tokio::time::timeout_at(deadline, self.manager.is_live(&mut *lease)).await;
        match checked {
            Ok(true) => Checkout::Ready(lease),
            Ok(false) => {
                self.metrics.record_health_check_failure();
                tracing::warn!(connection_id = id, "discarding stale connection on checkout");
                lease.discard().await;
                Checkout::Stale
            }
            Err(_) => {
                tracing::debug!(connection_id = id, "liveness check ran past checkout deadline");
                Checkout::DeadlinePassed
            }
        }
    }

    /// Decide whether a returned connection goes back into the queue.
    pub(crate) async fn should_keep(&self, entry: &mut PoolEntry<M::Connection>) -> bool {
        let id = entry.meta.id;

        if self.is_closed() {
            return false;
        }

        if entry.meta.is_expired(self.config.max_lifetime) {
            tracing::debug!(connection_id = id, "retiring connection past max lifetime");
            return false;
        }

        if self.config.test_on_checkin && !self.manager.is_live(&mut entry.conn).await {
            self.metrics.record_health_check_failure();
            tracing::warn!(connection_id = id, "dropping stale connection on checkin");
            return false;
        }

        true
    }

    /// Requeue or destroy a returned connection. Either way every waiter is
    /// woken.
    pub(crate) async fn finish_checkin(&self, mut entry: PoolEntry<M::Connection>, keep: bool) {
        if !keep {
            self.discard(entry).await;
            return;
        }

        entry.meta.mark_checkin();
        let id = entry.meta.id;
        let rejected = {
            let mut state = self.state.lock();
            if state.closed {
                Some(entry)
            } else {
                state.idle.push_back(entry);
                None
            }
        };

        match rejected {
            Some(entry) => self.discard(entry).await,
            None => {
                tracing::trace!(connection_id = id, "connection returned to pool");
                self.available.notify_waiters();
            }
        }
    }

    /// Return path for a lease dropped without an explicit release.
    pub(crate) fn checkin_on_drop(self: &Arc<Self>, entry: PoolEntry<M::Connection>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pending = PendingReturn {
                    inner: Arc::clone(self),
                    entry: Some(entry),
                };
                drop(handle.spawn(pending.run()));
            }
            Err(_) => self.checkin_blocking(entry),
        }
    }

    /// Close connections drained from a pool that was dropped without
    /// `close()`. With no runtime to run the closes they are just dropped.
    pub(crate) fn close_on_drop(self: &Arc<Self>, entries: Vec<PoolEntry<M::Connection>>) {
        if entries.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(self);
                drop(handle.spawn(async move {
                    for entry in entries {
                        inner.close_connection(entry).await;
                    }
                }));
            }
            Err(_) => {
                tracing::debug!(count = entries.len(), "dropping idle connections outside runtime");
                for _ in &entries {
                    self.metrics.record_closed();
                }
            }
        }
    }

    /// Checkin without a runtime: no liveness check is possible, so the
    /// connection is requeued as-is, or dropped if the pool is closed.
    fn checkin_blocking(&self, mut entry: PoolEntry<M::Connection>) {
        let expired = entry.meta.is_expired(self.config.max_lifetime);
        entry.meta.mark_checkin();
        let rejected = {
            let mut state = self.state.lock();
            if state.closed || expired {
                state.live = state.live.saturating_sub(1);
                Some(entry)
            } else {
                state.idle.push_back(entry);
                None
            }
        };

        if let Some(entry) = rejected {
            tracing::debug!(connection_id = entry.meta.id, "dropping connection outside runtime");
            self.metrics.record_closed();
            self.demand.notify_one();
        }
        self.available.notify_waiters();
    }

    /// Uncount a connection, wake everyone, then close it outside the lock.
    pub(crate) async fn discard(&self, entry: PoolEntry<M::Connection>) {
        self.forget_one();
        self.close_connection(entry).await;
    }

    /// Remove one connection from the live count without closing anything.
    pub(crate) fn forget_one(&self) {
        {
            let mut state = self.state.lock();
            state.live = state.live.saturating_sub(1);
        }
        self.demand.notify_one();
        self.available.notify_waiters();
    }

    /// Close a connection that is no longer counted. Close errors are logged.
    pub(crate) async fn close_connection(&self, mut entry: PoolEntry<M::Connection>) {
        let id = entry.meta.id;
        entry.meta.mark_closed();
        if let Err(e) = self.manager.close(entry.conn).await {
            tracing::warn!(connection_id = id, error = %e, "error closing connection");
        }
        self.metrics.record_closed();
        tracing::trace!(connection_id = id, "connection closed");
    }
}

/// A connection travelling back to the pool from a dropped lease.
///
/// A spawned task can be dropped before it completes, e.g. while the runtime
/// shuts down. If that happens the connection is uncounted here, so the
/// live count never keeps a connection nobody owns.
struct PendingReturn<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
    entry: Option<PoolEntry<M::Connection>>,
}

impl<M: ConnectionManager> PendingReturn<M> {
    async fn run(mut self) {
        let inner = Arc::clone(&self.inner);
        let Some(entry) = self.entry.as_mut() else {
            return;
        };
        let keep = inner.should_keep(entry).await;
        if let Some(entry) = self.entry.take() {
            inner.finish_checkin(entry, keep).await;
        }
    }
}

impl<M: ConnectionManager> Drop for PendingReturn<M> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            tracing::debug!(connection_id = entry.meta.id, "connection return abandoned");
            self.inner.forget_one();
            self.inner.metrics.record_closed();
        }
    }
}

/// Outcome of checking a freshly popped connection.
enum Checkout<M: ConnectionManager> {
    Ready(PooledConnection<M>),
    /// Discarded; try the next one.
    Stale,
    /// The deadline passed mid-check. The lease was dropped and returns
    /// the connection on its own.
    DeadlinePassed,
}

/// Counts a caller as waiting for as long as it is alive, so the producer
/// sees the demand even if the caller is cancelled mid-wait.
struct WaitRegistration<'a, M: ConnectionManager> {
    inner: &'a PoolInner<M>,
}

impl<'a, M: ConnectionManager> WaitRegistration<'a, M> {
    fn new(inner: &'a PoolInner<M>) -> Self {
        inner.state.lock().waiting += 1;
        inner.demand.notify_one();
        Self { inner }
    }
}

impl<M: ConnectionManager> Drop for WaitRegistration<'_, M> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.waiting = state.waiting.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(live: u32, idle: usize, waiting: u32) -> PoolState<()> {
        let mut state = PoolState::new(idle);
        state.live = live;
        state.waiting = waiting;
        for id in 0..idle {
            state.idle.push_back(PoolEntry::new((), id as u64));
        }
        state
    }

    #[tokio::test(start_paused = true)]
    async fn test_needs_connection_below_floor() {
        assert!(state(1, 1, 0).needs_connection(2, 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_needs_connection_on_demand() {
        assert!(!state(2, 0, 0).needs_connection(2, 4));
        assert!(state(2, 0, 1).needs_connection(2, 4));
        assert!(!state(3, 1, 1).needs_connection(2, 4));
        assert!(state(3, 1, 2).needs_connection(2, 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_needs_connection_at_ceiling() {
        assert!(!state(4, 0, 5).needs_connection(2, 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_needs_connection_when_closed() {
        let mut closed = state(0, 0, 3);
        closed.closed = true;
        assert!(!closed.needs_connection(2, 4));
    }
}
