//! Integration tests for one-shot actions and the shared lockout.

use std::sync::Arc;

mod common;

use common::{drain, init_test_tracing, u1};
use usersync_client::{
    ActionError, ActionOutcome, ActionSkip, Lockout, MemoryRemote, MemoryStore, RemoteError,
    RemoteOp, SyncEvent, UserCache, UserSession,
};
use usersync_types::{User, UserAction, UserField};

fn claim(code: &str) -> UserAction {
    UserAction::ClaimCode { code: code.into() }
}

/// A session whose cache and backend already agree on `u1`.
fn synced_session() -> (Arc<MemoryStore>, Arc<MemoryRemote>, UserSession) {
    init_test_tracing();
    let store = Arc::new(MemoryStore::new());
    let user = User::new(u1(), 1);
    UserCache::new(u1(), store.clone()).set_user(Some(&user));
    let remote = Arc::new(MemoryRemote::new().with_user(user));
    remote.add_code("WELCOME", 50);
    let session = UserSession::builder(u1(), store.clone(), remote.clone()).spawn();
    (store, remote, session)
}

#[tokio::test]
async fn test_action_replaces_cached_user() {
    let (_store, _remote, session) = synced_session();
    let mut rx = session.subscribe();

    let receipt = match session.actions.perform(claim("WELCOME")).await.unwrap() {
        ActionOutcome::Completed(receipt) => receipt,
        other => panic!("expected completion, got {other:?}"),
    };
    assert_eq!(receipt.user.reward_points(), 50);
    assert_eq!(session.sync.cached_user(), Some(receipt.user.clone()));

    let events = drain(&mut rx);
    assert_eq!(
        events,
        vec![
            SyncEvent::ActionChanged(true),
            SyncEvent::UserUpdated(receipt.user),
            SyncEvent::ActionChanged(false),
        ]
    );
    assert!(!session.actions.is_performing_action());
}

#[tokio::test]
async fn test_second_action_while_busy_is_skipped() {
    let (_store, remote, session) = synced_session();

    let hold = remote.hold();
    let first = {
        let actions = session.actions.clone();
        tokio::spawn(async move { actions.perform(claim("WELCOME")).await })
    };
    remote.wait_for_calls(RemoteOp::Action, 1).await;
    assert!(session.actions.is_performing_action());

    let second = session.actions.perform(claim("OTHER")).await.unwrap();
    assert_eq!(
        second,
        ActionOutcome::Skipped {
            reason: ActionSkip::Busy
        }
    );

    drop(hold);
    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, ActionOutcome::Completed(_)));
    assert_eq!(remote.calls(RemoteOp::Action), 1);
}

#[tokio::test]
async fn test_failed_action_reports_error_without_lockout() {
    let (_store, remote, session) = synced_session();
    let mut rx = session.subscribe();

    let err = session.actions.perform(claim("BOGUS")).await.unwrap_err();
    assert!(matches!(err, ActionError::Remote(RemoteError::Unknown(_))));
    assert!(!session.actions.is_locked_out());
    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        SyncEvent::Error {
            op: RemoteOp::Action,
            ..
        }
    )));

    // The lane is free again.
    let outcome = session.actions.perform(claim("WELCOME")).await.unwrap();
    assert!(matches!(outcome, ActionOutcome::Completed(_)));
    assert_eq!(remote.calls(RemoteOp::Action), 2);
}

#[tokio::test]
async fn test_unauthorized_action_locks_out_sync() {
    let (store, remote, session) = synced_session();
    session.sync.set_field(UserField::IsPremium(true));
    remote.fail_next(RemoteOp::Action, RemoteError::Unauthorized);

    let err = session.actions.perform(claim("WELCOME")).await.unwrap_err();
    assert!(matches!(err, ActionError::Remote(RemoteError::Unauthorized)));

    assert!(session.sync.is_locked_out());
    assert_eq!(session.sync.cached_user(), None);
    assert_eq!(session.sync.pending_mutation(), None);
    assert!(store.is_empty());

    session.sync.refresh(true);
    session.sync.settled().await;
    let outcome = session.actions.perform(claim("WELCOME")).await.unwrap();
    assert_eq!(
        outcome,
        ActionOutcome::Skipped {
            reason: ActionSkip::LockedOut
        }
    );
    assert_eq!(remote.total_calls(), 1);
}

#[tokio::test]
async fn test_lockout_shared_across_sessions() {
    let store = Arc::new(MemoryStore::new());
    let remote = Arc::new(MemoryRemote::new());
    remote.fail_next(RemoteOp::Create, RemoteError::Unauthorized);
    let lockout = Lockout::new();

    let first = UserSession::builder(u1(), store.clone(), remote.clone())
        .lockout(lockout.clone())
        .spawn();
    let second = UserSession::builder(u1(), store.clone(), remote.clone())
        .lockout(lockout.clone())
        .spawn();

    first.sync.refresh(false);
    lockout.tripped().await;

    second.sync.refresh(false);
    second.sync.settled().await;
    assert!(second.sync.is_locked_out());
    assert_eq!(remote.total_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lockout_leaves_cache_empty_under_concurrent_writes() {
    for iteration in 0..200 {
        let (store, remote, session) = synced_session();
        remote.fail_next(RemoteOp::Action, RemoteError::Unauthorized);

        let writer = {
            let sync = session.sync.clone();
            tokio::spawn(async move {
                for i in 0..100 {
                    sync.set_field(UserField::IsPremium(i % 2 == 0));
                    if i % 10 == 0 {
                        sync.refresh(false);
                    }
                    tokio::task::yield_now().await;
                }
            })
        };
        let err = session.actions.perform(claim("WELCOME")).await.unwrap_err();
        assert!(matches!(err, ActionError::Remote(RemoteError::Unauthorized)));

        writer.await.unwrap();
        session.sync.settled().await;
        assert!(
            store.is_empty(),
            "iteration {iteration}: {} keys survived the lockout",
            store.len()
        );
    }
}
