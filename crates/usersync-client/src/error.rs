//! Error taxonomy for remote calls.
//!
//! Every [`RemoteProvider`](crate::RemoteProvider) call fails with a
//! classified [`RemoteError`]. The classification drives the coordinator:
//!
//! - `Unauthorized` — terminal: clears the cache and locks the coordinator out
//! - `NotFound` — "absent" at the fetch call site, an ordinary failure elsewhere
//! - `Unknown` — reported through events, retried on the next external refresh

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified failure from the remote provider.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found")]
    NotFound,
    #[error("remote error: {0}")]
    Unknown(String),
}

impl RemoteError {
    pub fn unknown(msg: impl Into<String>) -> Self {
        RemoteError::Unknown(msg.into())
    }

    /// Whether this failure locks the coordinator out.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteError::Unauthorized)
    }
}

/// Which remote call produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RemoteOp {
    Fetch,
    Create,
    Update,
    Action,
}
