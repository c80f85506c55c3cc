//! Client-side sync coordinator for a cached remote user record.
//!
//! Keeps a locally cached [`User`](usersync_types::User) consistent with a
//! backend while tolerating offline periods, bursts of concurrent calls, and
//! authorization failures.
//!
//! ```text
//! set_field ──▶ merge ──▶ UserCache.pending ─┐
//! refresh ────▶ SyncActor (single-flight) ───┼──▶ RemoteProvider
//! perform ────▶ ActionActor (single-flight) ─┘        │
//!                     ▲                               ▼
//!                     └──── UserCache.user ◀── snapshot / RemoteError
//!                                   │
//!                                   └──▶ broadcast<SyncEvent>
//! ```
//!
//! Entry point: [`UserSession::builder`]. Coordinators run as tokio tasks, so
//! sessions must be spawned from within a runtime.

pub mod action;
pub mod cache;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod events;
mod lane;
pub mod lockout;
pub mod memory;
pub mod merge;
pub mod remote;
pub mod session;

pub use action::{ActionError, ActionHandle, ActionOutcome, ActionSkip};
pub use cache::{ByteStore, CacheError, FileStore, MemoryStore, StoreError, UserCache};
pub use config::{ClientConfig, ConfigError};
pub use coordinator::SyncHandle;
pub use error::{RemoteError, RemoteOp};
pub use events::{RefreshGate, SyncEvent};
pub use lockout::Lockout;
pub use memory::MemoryRemote;
pub use merge::merge;
pub use remote::RemoteProvider;
pub use session::{SessionBuilder, UserSession};
