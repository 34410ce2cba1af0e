//! # dbpool
//!
//! Bounded async pool of reusable database connections.
//!
//! The pool owns a FIFO queue of idle connections and hands them out as
//! leases that return themselves on drop. The backend is abstracted behind
//! [`ConnectionManager`]: the pool only ever opens, checks and closes
//! connections through it.
//!
//! ## Features
//!
//! - Initial batch of `min_connections` opened at startup
//! - Background producer that grows the pool on demand up to `max_connections`
//! - Background reaper that closes connections idle past `idle_timeout`,
//!   never shrinking below `min_connections`
//! - Liveness check on checkout and checkin; stale connections are closed
//!   and replaced transparently
//! - Checkout timeout enforced as a true deadline
//! - Status snapshot and lifetime metrics
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbpool::{BackendConfig, Pool};
//!
//! let backend = BackendConfig::from_connection_string(
//!     "host=127.0.0.1;port=3306;user=root;password=secret;database=app",
//! )?;
//!
//! let pool = Pool::builder(MyManager::default())
//!     .backend(backend)
//!     .min_connections(2)
//!     .max_connections(8)
//!     .idle_timeout(Duration::from_secs(60))
//!     .build()
//!     .await?;
//!
//! let conn = pool.get().await?;
//! // Use connection...
//! // Connection automatically returned to pool on drop
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod pool;

mod inner;
mod producer;
mod reaper;

pub use config::{BackendConfig, PoolConfig};
pub use connection::PooledConnection;
pub use error::PoolError;
pub use lifecycle::{ConnectionManager, ConnectionMetadata, ConnectionState};
pub use metrics::PoolMetrics;
pub use pool::{Pool, PoolBuilder, PoolStatus};
