//! Connection lifecycle management.
//!
//! This module defines the trait the pool uses to open, check and close
//! backend connections, and the metadata the pool tracks for every
//! connection it owns.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::BackendConfig;

/// Trait for opening, checking and closing backend connections.
///
/// The pool treats the connection itself as opaque. Everything it needs to
/// know about the backend goes through these three operations.
///
/// Uses `#[async_trait]` so the returned futures are `Send` and the pool's
/// background tasks can be spawned on a multi-threaded runtime.
#[async_trait::async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    /// The pooled connection type. Not required to be `Sync`; a connection
    /// is only ever used by one task at a time.
    type Connection: Send + 'static;

    /// Error returned by `connect` and `close`.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new connection to the backend.
    async fn connect(&self, backend: &BackendConfig) -> Result<Self::Connection, Self::Error>;

    /// Check whether the connection is still usable.
    ///
    /// May perform a network round trip. A successful check must leave the
    /// connection in a usable state.
    async fn is_live(&self, conn: &mut Self::Connection) -> bool;

    /// Close the connection.
    ///
    /// Called at most once per connection. Errors are logged by the pool and
    /// otherwise ignored.
    async fn close(&self, conn: Self::Connection) -> Result<(), Self::Error>;
}

/// Connection state tracked by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is idle and available for use.
    Idle,
    /// Connection is currently leased.
    InUse,
    /// Connection has been removed from the pool.
    Closed,
}

impl ConnectionState {
    /// Check if the connection is available for checkout.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Metadata about a pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Unique identifier for this connection.
    pub id: u64,
    /// When the connection was created.
    pub created_at: Instant,
    /// When the connection was last created, checked out or returned.
    pub last_active_at: Instant,
    /// Number of times the connection has been checked out.
    pub checkout_count: u64,
    /// Current state of the connection.
    pub state: ConnectionState,
}

impl ConnectionMetadata {
    /// Create metadata for a new connection.
    pub fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_active_at: now,
            checkout_count: 0,
            state: ConnectionState::Idle,
        }
    }

    /// Refresh the activity timestamp.
    pub fn touch(&mut self) {
        self.last_active_at = Instant::now();
    }

    /// How long since the connection was last active.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_active_at.elapsed()
    }

    /// Check if the connection has exceeded its maximum lifetime.
    #[must_use]
    pub fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|max| self.created_at.elapsed() > max)
    }

    /// Check if the connection has been idle at least `idle_timeout`.
    #[must_use]
    pub fn is_idle_expired(&self, idle_timeout: Duration) -> bool {
        self.idle_for() >= idle_timeout
    }

    /// Mark the connection as checked out.
    pub fn mark_checkout(&mut self) {
        self.touch();
        self.checkout_count += 1;
        self.state = ConnectionState::InUse;
    }

    /// Mark the connection as returned to idle.
    pub fn mark_checkin(&mut self) {
        self.touch();
        self.state = ConnectionState::Idle;
    }

    /// Mark the connection as removed from the pool.
    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_availability() {
        assert!(ConnectionState::Idle.is_available());
        assert!(!ConnectionState::InUse.is_available());
        assert!(!ConnectionState::Closed.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_metadata_new() {
        let meta = ConnectionMetadata::new(1);
        assert_eq!(meta.id, 1);
        assert_eq!(meta.checkout_count, 0);
        assert_eq!(meta.state, ConnectionState::Idle);
        assert_eq!(meta.idle_for(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_metadata_checkout_checkin() {
        let mut meta = ConnectionMetadata::new(1);
        meta.mark_checkout();
        assert_eq!(meta.checkout_count, 1);
        assert_eq!(meta.state, ConnectionState::InUse);

        tokio::time::advance(Duration::from_secs(3)).await;
        meta.mark_checkin();
        assert_eq!(meta.state, ConnectionState::Idle);
        assert_eq!(meta.idle_for(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_expiry() {
        let meta = ConnectionMetadata::new(7);
        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!meta.is_idle_expired(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(meta.is_idle_expired(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifetime_expiry() {
        let mut meta = ConnectionMetadata::new(3);
        tokio::time::advance(Duration::from_secs(10)).await;
        meta.touch();

        assert!(!meta.is_expired(None));
        assert!(!meta.is_expired(Some(Duration::from_secs(30))));
        assert!(meta.is_expired(Some(Duration::from_secs(5))));
    }
}
