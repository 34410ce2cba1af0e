//! Leased connections.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::inner::{PoolEntry, PoolInner};
use crate::lifecycle::{ConnectionManager, ConnectionMetadata};

/// A connection retrieved from the pool.
///
/// The lease gives its holder exclusive use of one connection. When it is
/// dropped the connection is returned to the pool: checked, then either
/// requeued or closed. Use [`release`](Self::release) to run that return
/// inline and wait for it.
pub struct PooledConnection<M: ConnectionManager> {
    // Some until release/discard/detach/drop takes it.
    entry: Option<PoolEntry<M::Connection>>,
    pool: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> PooledConnection<M> {
    pub(crate) fn new(pool: Arc<PoolInner<M>>, mut entry: PoolEntry<M::Connection>) -> Self {
        entry.meta.mark_checkout();
        Self {
            entry: Some(entry),
            pool,
        }
    }

    #[allow(clippy::expect_used)]
    fn entry(&self) -> &PoolEntry<M::Connection> {
        self.entry.as_ref().expect("lease already returned")
    }

    #[allow(clippy::expect_used)]
    fn entry_mut(&mut self) -> &mut PoolEntry<M::Connection> {
        self.entry.as_mut().expect("lease already returned")
    }

    /// Metadata for the leased connection.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.entry().meta
    }

    /// Return the connection to the pool and wait for the return to finish.
    ///
    /// The connection is checked (if `test_on_checkin` is set) and either
    /// requeued at the back of the idle queue or closed and uncounted.
    pub async fn release(mut self) {
        // Check while the lease still owns the entry, so cancelling this
        // future falls back to the drop path instead of leaking.
        let pool = Arc::clone(&self.pool);
        let keep = pool.should_keep(self.entry_mut()).await;
        if let Some(entry) = self.entry.take() {
            pool.finish_checkin(entry, keep).await;
        }
    }

    /// Close the connection instead of returning it.
    ///
    /// The pool's live count drops by one and the producer is woken to
    /// replace it if needed.
    pub async fn discard(mut self) {
        if let Some(entry) = self.entry.take() {
            tracing::debug!(connection_id = entry.meta.id, "discarding leased connection");
            self.pool.discard(entry).await;
        }
    }

    /// Detach the connection from the pool.
    ///
    /// The pool stops counting it and the caller becomes responsible for
    /// closing it.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn detach(mut self) -> M::Connection {
        let entry = self.entry.take().expect("lease already returned");
        tracing::debug!(connection_id = entry.meta.id, "detaching connection from pool");
        self.pool.forget_one();
        entry.conn
    }
}

impl<M: ConnectionManager> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        &self.entry().conn
    }
}

impl<M: ConnectionManager> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entry_mut().conn
    }
}

impl<M: ConnectionManager> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("metadata", &self.entry.as_ref().map(|e| &e.meta))
            .finish_non_exhaustive()
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            tracing::trace!(connection_id = entry.meta.id, "returning connection to pool");
            self.pool.checkin_on_drop(entry);
        }
    }
}
