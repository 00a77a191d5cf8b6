//! Shared test helpers

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

static TRACING: Once = Once::new();

/// Route `tracing` output to the test harness (`RUST_LOG` filters it)
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("parkgate_core=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Wait up to `timeout` for the next message on `rx`
pub async fn recv_within<T>(rx: &mut UnboundedReceiver<T>, timeout: Duration) -> Option<T> {
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
}

/// Poll `condition` every 10ms until it holds or `timeout` expires
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
