//! # dbpool-testing
//!
//! Test infrastructure for dbpool.
//!
//! Provides an in-memory backend implementing
//! [`ConnectionManager`](dbpool::ConnectionManager) so pool behavior can be
//! tested without a database server, plus small fixture helpers.
//!
//! ## Features
//!
//! - Session bookkeeping (open, opened, closed, connect attempts)
//! - Fault injection: refused connects, killed sessions, slow connects,
//!   failing closes
//! - Statement recording
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbpool::Pool;
//! use dbpool_testing::{MockBackend, fixtures::backend_config};
//!
//! #[tokio::test]
//! async fn test_with_mock_backend() {
//!     let backend = MockBackend::new();
//!     let pool = Pool::builder(backend.manager())
//!         .backend(backend_config())
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     backend.kill_all();
//!     // ...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_backend;

pub use mock_backend::{MockBackend, MockConnection, MockError, MockManager};
