//! In-memory backend for exercising the pool without a database.
//!
//! [`MockBackend`] plays the server: it hands out session ids, remembers
//! which sessions are open, and lets a test break things on purpose
//! (refuse connects, kill sessions, slow down connects, fail closes).
//! [`MockManager`] is the [`ConnectionManager`] the pool talks to.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dbpool::{BackendConfig, ConnectionManager};
use parking_lot::Mutex;
use thiserror::Error;

/// Error type for mock backend operations.
#[derive(Debug, Error)]
pub enum MockError {
    /// The backend refused the connection.
    #[error("connection refused by {0}")]
    Refused(String),

    /// The session was killed by the test.
    #[error("session {0} is dead")]
    Dead(u64),

    /// Closing the session failed.
    #[error("failed to close session {0}")]
    CloseFailed(u64),
}

#[derive(Debug, Default)]
struct BackendState {
    next_session: u64,
    open: HashSet<u64>,
    dead: HashSet<u64>,
    refuse_next: u32,
    refuse_all: bool,
    fail_close: bool,
    connect_delay: Duration,
    liveness_delay: Duration,
    opened_total: u64,
    closed_total: u64,
    connect_attempts: u64,
    statements: Vec<(u64, String)>,
}

/// Shared handle to the simulated server.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    /// Create a healthy backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager that connects to this backend.
    #[must_use]
    pub fn manager(&self) -> MockManager {
        MockManager {
            backend: self.clone(),
        }
    }

    /// Refuse the next `count` connect attempts.
    pub fn refuse_next(&self, count: u32) {
        self.state.lock().refuse_next = count;
    }

    /// Refuse every connect attempt until switched off.
    pub fn refuse_all(&self, refuse: bool) {
        self.state.lock().refuse_all = refuse;
    }

    /// Make every close report an error. The session is still closed.
    pub fn fail_close(&self, fail: bool) {
        self.state.lock().fail_close = fail;
    }

    /// Delay every connect by `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = delay;
    }

    /// Delay every liveness check by `delay`, as a slow server would.
    pub fn set_liveness_delay(&self, delay: Duration) {
        self.state.lock().liveness_delay = delay;
    }

    /// Kill one session. Liveness checks on it fail from now on.
    pub fn kill(&self, session: u64) {
        self.state.lock().dead.insert(session);
    }

    /// Kill every session currently open.
    pub fn kill_all(&self) {
        let mut state = self.state.lock();
        let open: Vec<u64> = state.open.iter().copied().collect();
        state.dead.extend(open);
    }

    /// Whether a session is open on the server side.
    #[must_use]
    pub fn is_open(&self, session: u64) -> bool {
        self.state.lock().open.contains(&session)
    }

    /// Number of sessions currently open.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state.lock().open.len()
    }

    /// Sessions ever opened.
    #[must_use]
    pub fn opened_total(&self) -> u64 {
        self.state.lock().opened_total
    }

    /// Sessions ever closed.
    #[must_use]
    pub fn closed_total(&self) -> u64 {
        self.state.lock().closed_total
    }

    /// Connect attempts, successful or not.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.state.lock().connect_attempts
    }

    /// Every statement executed so far, tagged with its session id.
    #[must_use]
    pub fn statements(&self) -> Vec<(u64, String)> {
        self.state.lock().statements.clone()
    }

    fn connect_delay(&self) -> Duration {
        self.state.lock().connect_delay
    }

    fn liveness_delay(&self) -> Duration {
        self.state.lock().liveness_delay
    }

    fn try_open(&self, backend: &BackendConfig) -> Result<u64, MockError> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        if state.refuse_all {
            return Err(MockError::Refused(backend.address()));
        }
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(MockError::Refused(backend.address()));
        }
        state.next_session += 1;
        let session = state.next_session;
        state.open.insert(session);
        state.opened_total += 1;
        Ok(session)
    }

    fn is_live(&self, session: u64) -> bool {
        let state = self.state.lock();
        state.open.contains(&session) && !state.dead.contains(&session)
    }

    fn close(&self, session: u64) -> Result<(), MockError> {
        let mut state = self.state.lock();
        if state.open.remove(&session) {
            state.closed_total += 1;
        }
        if state.fail_close {
            return Err(MockError::CloseFailed(session));
        }
        Ok(())
    }

    fn execute(&self, session: u64, sql: &str) -> Result<u64, MockError> {
        let mut state = self.state.lock();
        if !state.open.contains(&session) || state.dead.contains(&session) {
            return Err(MockError::Dead(session));
        }
        state.statements.push((session, sql.to_string()));
        Ok(1)
    }
}

/// A session on the mock backend.
#[derive(Debug)]
pub struct MockConnection {
    session: u64,
    backend: MockBackend,
}

impl MockConnection {
    /// Server-side session id.
    #[must_use]
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Run a statement. Returns the affected row count.
    pub fn execute(&mut self, sql: &str) -> Result<u64, MockError> {
        self.backend.execute(self.session, sql)
    }
}

/// [`ConnectionManager`] backed by a [`MockBackend`].
#[derive(Debug, Clone)]
pub struct MockManager {
    backend: MockBackend,
}

impl MockManager {
    /// The backend this manager connects to.
    #[must_use]
    pub fn backend(&self) -> &MockBackend {
        &self.backend
    }
}

#[async_trait::async_trait]
impl ConnectionManager for MockManager {
    type Connection = MockConnection;
    type Error = MockError;

    async fn connect(&self, backend: &BackendConfig) -> Result<MockConnection, MockError> {
        let delay = self.backend.connect_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let session = self.backend.try_open(backend)?;
        tracing::trace!(session, "mock session opened");
        Ok(MockConnection {
            session,
            backend: self.backend.clone(),
        })
    }

    async fn is_live(&self, conn: &mut MockConnection) -> bool {
        let delay = self.backend.liveness_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.backend.is_live(conn.session)
    }

    async fn close(&self, conn: MockConnection) -> Result<(), MockError> {
        tracing::trace!(session = conn.session, "mock session closed");
        self.backend.close(conn.session)
    }
}
