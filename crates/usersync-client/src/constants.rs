//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

/// Cache key prefix for the user snapshot (`entity:<id>`).
pub const USER_KEY_PREFIX: &str = "entity:";

/// Cache key prefix for the pending mutation (`pendingMutation:<id>`).
pub const PENDING_KEY_PREFIX: &str = "pendingMutation:";

/// Buffered [`SyncEvent`](crate::SyncEvent)s per subscriber before the
/// oldest are dropped and the receiver observes `Lagged`.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Directory name under the platform config/cache roots.
pub const APP_DIR_NAME: &str = "usersync";

/// Config file name inside the config directory.
pub const CONFIG_FILE_NAME: &str = "client.ron";

/// Default `EnvFilter` directive when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";
