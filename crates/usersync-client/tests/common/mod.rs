//! Helpers shared by the integration tests.

use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use usersync_client::SyncEvent;
use usersync_types::UserId;

/// Install a test-writer subscriber once; `RUST_LOG` overrides the filter.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("usersync_client=debug"));
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .try_init();
}

pub fn u1() -> UserId {
    UserId::new("u1")
}

pub fn drain(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}
