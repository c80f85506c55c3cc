//! The backend contract the coordinators consume.
//!
//! Transport, retries, and timeouts belong to the implementation; the
//! coordinators only see snapshots and classified errors.

use async_trait::async_trait;
use usersync_types::{ActionReceipt, User, UserAction, UserId, UserPatch};

use crate::error::RemoteError;

/// Performs user operations against the backend.
#[async_trait]
pub trait RemoteProvider: Send + Sync {
    /// Fetch the current snapshot. `Ok(None)` when the user does not exist.
    async fn fetch(&self, id: &UserId) -> Result<Option<User>, RemoteError>;

    /// Create the user (or update it if it already exists), seeded with the
    /// set fields of `patch`.
    async fn create(&self, id: &UserId, patch: &UserPatch) -> Result<User, RemoteError>;

    /// Apply the set fields of `patch`. Unset fields must not be sent.
    async fn update(&self, id: &UserId, patch: &UserPatch) -> Result<User, RemoteError>;

    /// Run a one-shot action.
    async fn perform_action(
        &self,
        id: &UserId,
        action: &UserAction,
    ) -> Result<ActionReceipt, RemoteError>;
}
