//! Background task that grows the pool on demand.
//!
//! The producer sleeps until a caller starts waiting, a connection is
//! discarded, or the pool falls below its floor. It then opens one
//! connection at a time, outside the state lock, until no more are needed
//! or the ceiling is reached. Connect failures are logged and retried after
//! `retry_delay`; they never end the loop.

use std::sync::Arc;

use crate::inner::PoolInner;
use crate::lifecycle::ConnectionManager;

pub(crate) async fn run<M: ConnectionManager>(inner: Arc<PoolInner<M>>) {
    let min = inner.config.min_connections;
    let max = inner.config.max_connections;
    tracing::debug!(min, max, "producer started");

    loop {
        let wanted = inner.state.lock().needs_connection(min, max);
        if !wanted {
            tokio::select! {
                () = inner.shutdown.cancelled() => break,
                () = inner.demand.notified() => continue,
            }
        }

        let opened = tokio::select! {
            () = inner.shutdown.cancelled() => break,
            opened = inner.open_connection() => opened,
        };

        match opened {
            Ok(entry) => inner.add_idle(entry).await,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    backend = %inner.backend.address(),
                    "producer failed to open connection"
                );
                inner.available.notify_waiters();
                tokio::select! {
                    () = inner.shutdown.cancelled() => break,
                    () = tokio::time::sleep(inner.config.retry_delay) => {}
                }
            }
        }
    }

    tracing::debug!("producer stopped");
}
