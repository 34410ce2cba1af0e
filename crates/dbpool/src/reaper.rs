//! Background task that closes connections left idle too long.

use std::sync::Arc;

use crate::inner::PoolInner;
use crate::lifecycle::ConnectionManager;

pub(crate) async fn run<M: ConnectionManager>(inner: Arc<PoolInner<M>>) {
    let interval = inner.config.effective_reap_interval();
    tracing::debug!(?interval, "reaper started");

    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }

        let reaped = reap_idle(&inner).await;
        if reaped > 0 {
            tracing::debug!(reaped, "reaped idle connections");
        }
    }

    tracing::debug!("reaper stopped");
}

/// Close idle connections older than `idle_timeout`, oldest first, without
/// going below `min_connections`.
///
/// The idle queue is ordered by return time, so the sweep stops at the first
/// connection that is still fresh. Each close runs with the lock released.
pub(crate) async fn reap_idle<M: ConnectionManager>(inner: &PoolInner<M>) -> usize {
    let min = inner.config.min_connections;
    let idle_timeout = inner.config.idle_timeout;
    let mut reaped = 0;

    loop {
        let victim = {
            let mut state = inner.state.lock();
            if state.closed || state.live <= min {
                break;
            }
            match state.idle.front() {
                Some(entry) if entry.meta.is_idle_expired(idle_timeout) => {
                    state.live -= 1;
                    state.idle.pop_front()
                }
                _ => break,
            }
        };

        if let Some(entry) = victim {
            tracing::trace!(
                connection_id = entry.meta.id,
                idle_for = ?entry.meta.idle_for(),
                "reaping idle connection"
            );
            inner.metrics.record_reaped();
            inner.close_connection(entry).await;
            reaped += 1;
        }
    }

    reaped
}
