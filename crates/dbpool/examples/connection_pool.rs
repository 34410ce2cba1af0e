//! Connection pooling with metrics example.
//!
//! Runs the pool against the in-memory backend from `dbpool-testing`, so no
//! database is needed. Shows basic checkout, concurrent use, idle reaping
//! and recovery from a dead connection.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=dbpool=debug cargo run -p dbpool --example connection_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use dbpool::{BackendConfig, Pool, PoolConfig};
use dbpool_testing::{MockBackend, MockManager};
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let conn_str = std::env::var("DBPOOL_CONNECTION_STRING").unwrap_or_else(|_| {
        "host=127.0.0.1;port=3306;user=root;password=secret;database=app".into()
    });
    let backend_config = BackendConfig::from_connection_string(&conn_str)?;

    println!("=== Connection Pool with Metrics Example ===\n");

    let pool_config = PoolConfig::new()
        .min_connections(2)
        .max_connections(4)
        .connection_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(1));

    println!("Pool configuration:");
    println!("  Backend: {}", backend_config.address());
    println!("  Min connections: {}", pool_config.min_connections);
    println!("  Max connections: {}", pool_config.max_connections);
    println!("  Idle timeout: {:?}", pool_config.idle_timeout);
    println!();

    let backend = MockBackend::new();
    let pool = Arc::new(Pool::new(pool_config, backend_config, backend.manager()).await?);
    print_pool_status(&pool);

    // Example 1: Basic pool usage
    println!("\n1. Basic pool usage:");
    {
        let mut conn = pool.get().await?;
        let rows = conn.execute("SELECT 1")?;
        println!("  Session {} affected {} row(s)", conn.session(), rows);
        // Connection is automatically returned to pool when dropped
    }

    // Example 2: Concurrent usage
    println!("\n2. Concurrent pool usage (8 parallel tasks):");
    let start = Instant::now();
    let mut handles = vec![];

    for i in 0..8 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            let mut conn = pool.get().await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            conn.execute(&format!("SELECT {i}"))?;
            conn.release().await;
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(i)
        }));
    }

    let mut completed = 0;
    for handle in handles {
        if handle.await?.is_ok() {
            completed += 1;
        }
    }
    println!("  Completed {} tasks in {:?}", completed, start.elapsed());
    print_pool_status(&pool);

    // Example 3: Idle connections are reaped back down to the minimum
    println!("\n3. Idle reaping:");
    tokio::time::sleep(Duration::from_millis(2500)).await;
    print_pool_status(&pool);

    // Example 4: Dead connections are replaced transparently
    println!("\n4. Recovering from a dead connection:");
    backend.kill_all();
    let conn = pool.get().await?;
    println!("  Got fresh session {}", conn.session());
    conn.release().await;
    print_pool_status(&pool);

    println!("\n5. Final pool metrics:");
    print_pool_metrics(&pool);

    println!("\n6. Graceful shutdown:");
    pool.close().await;
    println!("  Pool closed, {} backend session(s) open.", backend.open_count());

    Ok(())
}

fn print_pool_status(pool: &Pool<MockManager>) {
    let status = pool.status();
    println!(
        "  Status: {}/{} connections in use, {} idle ({:.1}% utilization)",
        status.in_use,
        status.total,
        status.available,
        status.utilization()
    );
}

fn print_pool_metrics(pool: &Pool<MockManager>) {
    let metrics = pool.metrics();
    println!("  Metrics:");
    println!("    Connections created: {}", metrics.connections_created);
    println!("    Connections closed: {}", metrics.connections_closed);
    println!("    Connections reaped: {}", metrics.connections_reaped);
    println!(
        "    Checkout success rate: {:.2}%",
        metrics.checkout_success_rate() * 100.0
    );
    println!("    Health check failures: {}", metrics.health_check_failures);
    println!("    Average wait: {:?}", metrics.average_wait());
}
