//! The remote-owned user snapshot.
//!
//! A `User` is never edited in place on the client. Every successful fetch,
//! create, update, or action response replaces the cached value wholesale;
//! local intent lives in [`UserPatch`](crate::UserPatch) until the backend
//! acknowledges it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Snapshot of the user entity as last reported by the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    /// Referral code of whoever invited this user.
    #[serde(default)]
    pub referred_by: Option<String>,
    #[serde(default)]
    pub onboarding_completed: bool,
    /// This user's own shareable referral code (server-assigned).
    #[serde(default)]
    pub referral_code: Option<String>,
    #[serde(default)]
    pub reward: Option<RewardState>,
    #[serde(default)]
    pub stats: UserStats,
    /// Unix millis.
    #[serde(default)]
    pub created_at: u64,
    /// Unix millis.
    #[serde(default)]
    pub updated_at: u64,
    /// Remote fields this client does not model. Round-tripped untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl User {
    /// A freshly created user with only server defaults.
    pub fn new(id: UserId, now: u64) -> Self {
        Self {
            id,
            is_premium: false,
            display_name: None,
            locale: None,
            referred_by: None,
            onboarding_completed: false,
            referral_code: None,
            reward: None,
            stats: UserStats::default(),
            created_at: now,
            updated_at: now,
            extra: BTreeMap::new(),
        }
    }

    /// Total reward points, zero when not enrolled in a program.
    pub fn reward_points(&self) -> u64 {
        self.reward.as_ref().map(|r| r.points).unwrap_or(0)
    }
}

/// Enrollment in a reward / loyalty program.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardState {
    pub program: String,
    pub points: u64,
    #[serde(default)]
    pub tier: Option<String>,
}

/// Server-computed usage counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    #[serde(default)]
    pub sessions: u64,
    #[serde(default)]
    pub streak_days: u32,
    /// Codes this user has already redeemed.
    #[serde(default)]
    pub claimed_codes: Vec<String>,
}
