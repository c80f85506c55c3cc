//! One-shot remote actions.
//!
//! Unlike field updates, actions are never merged or queued: each call is a
//! single request whose response carries a fresh [`User`] snapshot.

use serde::{Deserialize, Serialize};

use crate::user::User;

/// A one-shot action against the user's remote record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UserAction {
    /// Redeem a promotional or referral code.
    ClaimCode { code: String },
    /// Spend reward points on a catalog item.
    RedeemReward { reward_id: String },
}

/// Successful action response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionReceipt {
    /// Snapshot after the action was applied.
    pub user: User,
    /// Optional human-readable message from the server.
    #[serde(default)]
    pub message: Option<String>,
}
