//! Test fixture utilities.

use std::sync::Once;
use std::time::Duration;

use dbpool::BackendConfig;

/// Backend parameters that pass validation. The mock backend ignores them
/// apart from the address it reports in refusals.
#[must_use]
pub fn backend_config() -> BackendConfig {
    BackendConfig::new("127.0.0.1")
        .port(3306)
        .credentials("root", "password")
        .database("test")
        .connect_timeout(Duration::from_secs(5))
}

/// Install a fmt subscriber once per process, honoring `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
