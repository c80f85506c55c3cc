//! In-memory [`RemoteProvider`] for tests and local simulation.
//!
//! Behaves like a small backend: users live in a map, codes can be claimed
//! once per user for reward points, rewards cost points. On top of that it
//! exposes the knobs tests need:
//!
//! - per-operation call counters ([`MemoryRemote::calls`])
//! - recorded create/update payloads ([`MemoryRemote::payloads`])
//! - scripted failures ([`MemoryRemote::fail_next`])
//! - [`MemoryRemote::hold`] / [`MemoryRemote::hold_op`] guards that park
//!   calls until dropped

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;
use usersync_types::{ActionReceipt, RewardState, User, UserAction, UserId, UserPatch, now_millis};

use crate::error::{RemoteError, RemoteOp};
use crate::remote::RemoteProvider;

/// Reward program name assigned on first points grant.
const DEFAULT_PROGRAM: &str = "default";

const OP_COUNT: usize = 4;

fn op_index(op: RemoteOp) -> usize {
    match op {
        RemoteOp::Fetch => 0,
        RemoteOp::Create => 1,
        RemoteOp::Update => 2,
        RemoteOp::Action => 3,
    }
}

#[derive(Default)]
struct Backend {
    users: HashMap<UserId, User>,
    /// Claimable code → points granted.
    codes: HashMap<String, u64>,
    /// Reward id → cost in points.
    rewards: HashMap<String, u64>,
    failures: HashMap<RemoteOp, VecDeque<RemoteError>>,
    payloads: Vec<(RemoteOp, UserPatch)>,
}

pub struct MemoryRemote {
    backend: Mutex<Backend>,
    calls: watch::Sender<[usize; OP_COUNT]>,
    /// Per-operation pause flags.
    paused: watch::Sender<[bool; OP_COUNT]>,
}

/// Parks the held operations while alive.
#[must_use = "calls resume as soon as the guard is dropped"]
pub struct HoldGuard<'a> {
    paused: &'a watch::Sender<[bool; OP_COUNT]>,
    held: [bool; OP_COUNT],
}

impl Drop for HoldGuard<'_> {
    fn drop(&mut self) {
        let held = self.held;
        self.paused.send_modify(|paused| {
            for (flag, was_held) in paused.iter_mut().zip(held) {
                if was_held {
                    *flag = false;
                }
            }
        });
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        let (calls, _) = watch::channel([0; OP_COUNT]);
        let (paused, _) = watch::channel([false; OP_COUNT]);
        Self {
            backend: Mutex::new(Backend::default()),
            calls,
            paused,
        }
    }

    /// Seed a user record.
    pub fn insert_user(&self, user: User) {
        self.backend.lock().users.insert(user.id.clone(), user);
    }

    /// Builder form of [`MemoryRemote::insert_user`].
    pub fn with_user(self, user: User) -> Self {
        self.insert_user(user);
        self
    }

    /// The backend's current record for `id`.
    pub fn user(&self, id: &UserId) -> Option<User> {
        self.backend.lock().users.get(id).cloned()
    }

    /// Register a claimable code worth `points`.
    pub fn add_code(&self, code: impl Into<String>, points: u64) {
        self.backend.lock().codes.insert(code.into(), points);
    }

    /// Register a redeemable reward costing `cost` points.
    pub fn add_reward(&self, reward_id: impl Into<String>, cost: u64) {
        self.backend.lock().rewards.insert(reward_id.into(), cost);
    }

    /// Make the next call of `op` fail with `error`. Queued per operation.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.backend
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// How many times `op` has been called (including failed calls).
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.calls.borrow()[op_index(op)]
    }

    pub fn total_calls(&self) -> usize {
        self.calls.borrow().iter().sum()
    }

    /// Patches sent with `op` (create or update), oldest first.
    pub fn payloads(&self, op: RemoteOp) -> Vec<UserPatch> {
        self.backend
            .lock()
            .payloads
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Park every call (after it is counted) until the guard drops.
    pub fn hold(&self) -> HoldGuard<'_> {
        self.hold_ops([true; OP_COUNT])
    }

    /// Park only calls of `op`; other operations go through.
    pub fn hold_op(&self, op: RemoteOp) -> HoldGuard<'_> {
        let mut held = [false; OP_COUNT];
        held[op_index(op)] = true;
        self.hold_ops(held)
    }

    fn hold_ops(&self, held: [bool; OP_COUNT]) -> HoldGuard<'_> {
        self.paused.send_modify(|paused| {
            for (flag, hold) in paused.iter_mut().zip(held) {
                *flag |= hold;
            }
        });
        HoldGuard {
            paused: &self.paused,
            held,
        }
    }

    /// Resolve once `op` has been called at least `n` times.
    pub async fn wait_for_calls(&self, op: RemoteOp, n: usize) {
        let mut rx = self.calls.subscribe();
        let _ = rx.wait_for(|c| c[op_index(op)] >= n).await;
    }

    /// Count the call, wait out any hold, then pop a scripted failure.
    async fn enter(&self, op: RemoteOp) -> Result<(), RemoteError> {
        self.calls.send_modify(|c| c[op_index(op)] += 1);
        trace!(%op, "MemoryRemote call");
        {
            let mut rx = self.paused.subscribe();
            let _ = rx.wait_for(|paused| !paused[op_index(op)]).await;
        }
        match self
            .backend
            .lock()
            .failures
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend {
    fn grant_points(user: &mut User, points: u64) {
        let reward = user.reward.get_or_insert_with(|| RewardState {
            program: DEFAULT_PROGRAM.to_string(),
            points: 0,
            tier: None,
        });
        reward.points += points;
    }
}

#[async_trait]
impl RemoteProvider for MemoryRemote {
    async fn fetch(&self, id: &UserId) -> Result<Option<User>, RemoteError> {
        self.enter(RemoteOp::Fetch).await?;
        Ok(self.backend.lock().users.get(id).cloned())
    }

    async fn create(&self, id: &UserId, patch: &UserPatch) -> Result<User, RemoteError> {
        self.enter(RemoteOp::Create).await?;
        let now = now_millis();
        let mut backend = self.backend.lock();
        backend.payloads.push((RemoteOp::Create, patch.clone()));
        let user = backend.users.entry(id.clone()).or_insert_with(|| {
            let mut user = User::new(id.clone(), now);
            user.referral_code = Some(format!("REF-{}", id.short().to_uppercase()));
            user
        });
        patch.apply_to(user);
        user.updated_at = now;
        Ok(user.clone())
    }

    async fn update(&self, id: &UserId, patch: &UserPatch) -> Result<User, RemoteError> {
        self.enter(RemoteOp::Update).await?;
        let mut backend = self.backend.lock();
        backend.payloads.push((RemoteOp::Update, patch.clone()));
        let user = backend.users.get_mut(id).ok_or(RemoteError::NotFound)?;
        patch.apply_to(user);
        user.updated_at = now_millis();
        Ok(user.clone())
    }

    async fn perform_action(
        &self,
        id: &UserId,
        action: &UserAction,
    ) -> Result<ActionReceipt, RemoteError> {
        self.enter(RemoteOp::Action).await?;
        let mut backend = self.backend.lock();
        let Backend {
            users,
            codes,
            rewards,
            ..
        } = &mut *backend;
        let user = users.get_mut(id).ok_or(RemoteError::NotFound)?;

        let message = match action {
            UserAction::ClaimCode { code } => {
                let points = *codes
                    .get(code)
                    .ok_or_else(|| RemoteError::unknown(format!("invalid code {code}")))?;
                if user.stats.claimed_codes.contains(code) {
                    return Err(RemoteError::unknown(format!("code {code} already claimed")));
                }
                Backend::grant_points(user, points);
                user.stats.claimed_codes.push(code.clone());
                format!("claimed {points} points")
            }
            UserAction::RedeemReward { reward_id } => {
                let cost = *rewards
                    .get(reward_id)
                    .ok_or_else(|| RemoteError::unknown(format!("unknown reward {reward_id}")))?;
                let reward = user
                    .reward
                    .as_mut()
                    .filter(|r| r.points >= cost)
                    .ok_or_else(|| RemoteError::unknown("insufficient points"))?;
                reward.points -= cost;
                format!("redeemed {reward_id}")
            }
        };
        user.updated_at = now_millis();
        Ok(ActionReceipt {
            user: user.clone(),
            message: Some(message),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usersync_types::UserField;

    fn u1() -> UserId {
        UserId::new("u1")
    }

    #[tokio::test]
    async fn create_is_create_or_update() {
        let remote = MemoryRemote::new();
        let patch = UserPatch::new(u1()).with(UserField::Locale(Some("en".into())));
        let created = remote.create(&u1(), &patch).await.unwrap();
        assert_eq!(created.locale.as_deref(), Some("en"));
        assert_eq!(created.referral_code.as_deref(), Some("REF-U1"));

        let again = remote
            .create(&u1(), &UserPatch::new(u1()).with(UserField::IsPremium(true)))
            .await
            .unwrap();
        assert!(again.is_premium);
        assert_eq!(again.locale.as_deref(), Some("en"));
        assert_eq!(remote.calls(RemoteOp::Create), 2);
    }

    #[tokio::test]
    async fn update_of_missing_user_is_not_found() {
        let remote = MemoryRemote::new();
        let err = remote.update(&u1(), &UserPatch::new(u1())).await.unwrap_err();
        assert_eq!(err, RemoteError::NotFound);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let remote = MemoryRemote::new();
        remote.fail_next(RemoteOp::Fetch, RemoteError::unknown("boom"));
        remote.fail_next(RemoteOp::Fetch, RemoteError::Unauthorized);
        assert_eq!(remote.fetch(&u1()).await, Err(RemoteError::unknown("boom")));
        assert_eq!(remote.fetch(&u1()).await, Err(RemoteError::Unauthorized));
        assert_eq!(remote.fetch(&u1()).await, Ok(None));
        assert_eq!(remote.calls(RemoteOp::Fetch), 3);
    }

    #[tokio::test]
    async fn codes_are_single_use_and_rewards_cost_points() {
        let remote = MemoryRemote::new().with_user(User::new(u1(), 0));
        remote.add_code("WELCOME", 50);
        remote.add_reward("sticker", 30);

        let claim = UserAction::ClaimCode { code: "WELCOME".into() };
        let receipt = remote.perform_action(&u1(), &claim).await.unwrap();
        assert_eq!(receipt.user.reward_points(), 50);
        assert!(remote.perform_action(&u1(), &claim).await.is_err());

        let redeem = UserAction::RedeemReward { reward_id: "sticker".into() };
        let receipt = remote.perform_action(&u1(), &redeem).await.unwrap();
        assert_eq!(receipt.user.reward_points(), 20);
        assert!(remote.perform_action(&u1(), &redeem).await.is_err());
    }

    #[tokio::test]
    async fn hold_op_parks_only_that_operation() {
        let remote = std::sync::Arc::new(MemoryRemote::new().with_user(User::new(u1(), 0)));
        let guard = remote.hold_op(RemoteOp::Update);
        let task = {
            let remote = remote.clone();
            tokio::spawn(async move { remote.update(&u1(), &UserPatch::new(u1())).await })
        };
        remote.wait_for_calls(RemoteOp::Update, 1).await;
        assert!(remote.fetch(&u1()).await.unwrap().is_some());
        assert!(!task.is_finished());
        drop(guard);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn hold_parks_calls_until_released() {
        let remote = std::sync::Arc::new(MemoryRemote::new());
        let guard = remote.hold();
        let task = {
            let remote = remote.clone();
            tokio::spawn(async move { remote.fetch(&u1()).await })
        };
        remote.wait_for_calls(RemoteOp::Fetch, 1).await;
        assert!(!task.is_finished());
        drop(guard);
        assert_eq!(task.await.unwrap(), Ok(None));
    }
}
