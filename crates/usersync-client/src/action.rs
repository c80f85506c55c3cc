//! Single-flight lane for one-shot remote actions.
//!
//! Actions (claiming a code, redeeming a reward) are never queued or merged.
//! While one is in flight, a second call is turned away with
//! [`ActionSkip::Busy`]. A successful response replaces the cached user the
//! same way a successful update does; an authorization failure trips the
//! [`Lockout`] shared with the sync coordinator.

use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Instrument, debug, info, info_span, warn};
use usersync_types::{ActionReceipt, UserAction, UserId};

use crate::cache::UserCache;
use crate::coordinator::Shared;
use crate::error::{RemoteError, RemoteOp};
use crate::events::{EventSink, SyncEvent};
use crate::lane::Lane;
use crate::lockout::Lockout;
use crate::remote::RemoteProvider;

/// Result of a [`ActionHandle::perform`] call that did not fail remotely.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The action ran and the cache now holds the returned snapshot.
    Completed(ActionReceipt),
    /// The action was not attempted.
    Skipped { reason: ActionSkip },
}

/// Why an action was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSkip {
    /// Another action is still in flight.
    Busy,
    /// The session is locked out after an authorization failure.
    LockedOut,
}

/// Errors surfaced to the caller of [`ActionHandle::perform`].
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("action coordinator shut down")]
    Shutdown,
}

type ActionReply = oneshot::Sender<Result<ActionOutcome, ActionError>>;

// ============================================================================
// Commands (internal)
// ============================================================================

enum ActionCommand {
    Perform {
        action: UserAction,
        reply: ActionReply,
    },
}

// ============================================================================
// ActionHandle (Send + Sync public API)
// ============================================================================

/// Handle to a running action coordinator.
#[derive(Clone)]
pub struct ActionHandle {
    tx: mpsc::UnboundedSender<ActionCommand>,
    performing: watch::Receiver<bool>,
    lockout: Lockout,
}

impl ActionHandle {
    /// Run `action` unless one is already in flight or the session is
    /// locked out. Resolves when the action completes.
    pub async fn perform(&self, action: UserAction) -> Result<ActionOutcome, ActionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ActionCommand::Perform { action, reply })
            .map_err(|_| ActionError::Shutdown)?;
        rx.await.map_err(|_| ActionError::Shutdown)?
    }

    /// True while an action is in flight.
    pub fn is_performing_action(&self) -> bool {
        *self.performing.borrow()
    }

    pub fn is_locked_out(&self) -> bool {
        self.lockout.is_tripped()
    }
}

impl std::fmt::Debug for ActionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionHandle")
            .field("performing", &self.is_performing_action())
            .field("locked_out", &self.is_locked_out())
            .finish()
    }
}

// ============================================================================
// ActionActor (internal)
// ============================================================================

struct ActionReport {
    action: UserAction,
    result: Result<ActionReceipt, RemoteError>,
    reply: ActionReply,
}

struct ActionActor {
    id: UserId,
    cache: Arc<UserCache>,
    remote: Arc<dyn RemoteProvider>,
    lockout: Lockout,
    events: EventSink,
    lane: Lane<ActionReport>,
}

impl ActionActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ActionCommand>) {
        let mut open = true;
        while open || self.lane.is_active() {
            tokio::select! {
                biased;
                cmd = rx.recv(), if open => match cmd {
                    Some(ActionCommand::Perform { action, reply }) => self.start(action, reply),
                    None => open = false,
                },
                report = self.lane.finished() => self.finish(report),
            }
        }
        debug!(user = %self.id, "Action coordinator shutting down: channel closed");
    }

    fn start(&mut self, action: UserAction, reply: ActionReply) {
        let skip = if self.lockout.is_tripped() {
            Some(ActionSkip::LockedOut)
        } else if self.lane.is_active() {
            Some(ActionSkip::Busy)
        } else {
            None
        };
        if let Some(reason) = skip {
            debug!(user = %self.id, %action, ?reason, "Skipping action");
            let _ = reply.send(Ok(ActionOutcome::Skipped { reason }));
            return;
        }

        let id = self.id.clone();
        let remote = self.remote.clone();
        let span = info_span!("user_action", user = %self.id, %action);
        let fut = async move {
            let result = remote.perform_action(&id, &action).await;
            ActionReport {
                action,
                result,
                reply,
            }
        };
        self.lane.start(fut.instrument(span).boxed());
        self.events.emit(SyncEvent::ActionChanged(true));
    }

    fn finish(&mut self, report: ActionReport) {
        let ActionReport {
            action,
            result,
            reply,
        } = report;

        let outcome = match result {
            Ok(receipt) => {
                if self.cache.commit(&self.lockout, &receipt.user, None) {
                    info!(user = %self.id, %action, "Action complete");
                    self.events.emit(SyncEvent::UserUpdated(receipt.user.clone()));
                } else {
                    debug!(user = %self.id, "Locked out mid-action, discarding response");
                }
                Ok(ActionOutcome::Completed(receipt))
            }
            Err(error) => {
                warn!(user = %self.id, %action, "Action failed: {error}");
                if error.is_terminal() {
                    self.lockout.engage(&self.cache, &self.events);
                }
                self.events.emit(SyncEvent::Error {
                    op: RemoteOp::Action,
                    error: error.clone(),
                });
                Err(ActionError::Remote(error))
            }
        };
        self.events.emit(SyncEvent::ActionChanged(false));
        let _ = reply.send(outcome);
    }
}

/// Spawn an action coordinator on the current tokio runtime.
pub(crate) fn spawn_actions(shared: &Shared) -> ActionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (lane, performing) = Lane::new();
    let actor = ActionActor {
        id: shared.cache.id().clone(),
        cache: shared.cache.clone(),
        remote: shared.remote.clone(),
        lockout: shared.lockout.clone(),
        events: shared.events.clone(),
        lane,
    };
    tokio::spawn(actor.run(rx));
    ActionHandle {
        tx,
        performing,
        lockout: shared.lockout.clone(),
    }
}
