//! Shared user, patch, and action types for usersync.
//!
//! This crate is the data model: the remote-owned [`User`] snapshot, the
//! locally queued [`UserPatch`], and the one-shot [`UserAction`]s. It has
//! **no internal usersync dependencies** — a pure leaf crate that the client
//! and CLI build on.
//!
//! # Overview
//!
//! ```text
//! UserId ← stable external identifier (app-user id)
//!     └── User        remote-owned snapshot, replaced wholesale on every sync
//!     └── UserPatch   local field-level intent, at most one per id
//!             └── Patch<T> per field: Unset | Set(value)
//!     └── UserAction  one-shot remote action (claim code, redeem reward)
//!             └── ActionReceipt  fresh User + optional server message
//! ```
//!
//! # Key Types
//!
//! |-------------------|----------------------------------------------|
//! | Type              | Purpose                                      |
//! |-------------------|----------------------------------------------|
//! | [`UserId`]        | Who (opaque external id)                     |
//! | [`User`]          | Remote entity snapshot                       |
//! | [`UserPatch`]     | Pending mutation (only explicitly set fields)|
//! | [`Patch`]         | Set-vs-unset tagged union for one field      |
//! | [`UserField`]     | One typed setter call                        |
//! | [`UserAction`]    | One-shot remote action                       |
//! | [`ActionReceipt`] | Result of a successful action                |
//! |-------------------|----------------------------------------------|

pub mod action;
pub mod ids;
pub mod patch;
pub mod user;

// Re-export primary types at crate root for convenience.
pub use action::{ActionReceipt, UserAction};
pub use ids::UserId;
pub use patch::{FieldError, Patch, UserField, UserPatch};
pub use user::{RewardState, User, UserStats};

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
