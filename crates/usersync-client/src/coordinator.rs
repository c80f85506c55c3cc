//! Actor-based sync coordinator for one user.
//!
//! The [`SyncHandle`] is `Send + Sync` and cheap to clone. Every command it
//! issues goes over an mpsc channel to a single [`SyncActor`] task, which
//! owns all mutable coordinator state and polls the in-flight run on the same
//! task. Flag checks and flips therefore never interleave, and the only
//! suspension points inside a run are the remote calls.
//!
//! ```text
//!   SyncHandle (Send+Sync)      mpsc       SyncActor (tokio task)
//!   ┌─────────────────────┐  ────────▶  ┌──────────────────────────────┐
//!   │ .set_field()        │             │ sticky force / rerun flags   │
//!   │ .refresh()          │             │ Lane<RunReport> (one run)    │
//!   │ .settled()          │  ◀────────  │ UserCache writes             │
//!   └─────────────────────┘   oneshot   └──────────────────────────────┘
//!            │ cached_user() / is_refreshing() read shared state directly
//! ```
//!
//! # Run decision
//!
//! ```text
//! cached?  first run or forced?   action
//! ───────  ────────────────────   ─────────────────────────────────────────
//! yes      yes                    fetch → cache → update(pending) if any
//! yes      no                     update(pending) if any, else nothing
//! no       forced                 fetch → (found: as above | absent: create)
//! no       not forced             create(seeded from pending)
//! ```
//!
//! A successful run that finds new work (a sticky force flag, a refresh that
//! arrived mid-run, or a pending mutation that survived the equality-guarded
//! clear) immediately starts a follow-up run. Each run checks again, so work
//! keeps draining until a run ends with nothing queued.

use std::sync::{Arc, Weak};

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{Instrument, debug, info, info_span, warn};
use usersync_types::{User, UserField, UserId, UserPatch};

use crate::cache::UserCache;
use crate::error::{RemoteError, RemoteOp};
use crate::events::{EventSink, RefreshGate, SyncEvent, gate_allows};
use crate::lane::Lane;
use crate::lockout::Lockout;
use crate::merge::merge;
use crate::remote::RemoteProvider;

// ============================================================================
// Commands (internal)
// ============================================================================

/// Internal command sent from SyncHandle → SyncActor via mpsc.
enum SyncCommand {
    SetField(UserField),
    Refresh { force_fetch: bool },
    Settled { reply: oneshot::Sender<()> },
}

// ============================================================================
// SyncHandle (Send + Sync public API)
// ============================================================================

/// Handle to a running sync coordinator.
///
/// Commands are fire-and-forget: remote failures never come back through
/// these methods. Subscribe to [`SyncEvent`]s to observe outcomes.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<SyncCommand>,
    cache: Arc<UserCache>,
    refreshing: watch::Receiver<bool>,
    lockout: Lockout,
    events: EventSink,
}

impl SyncHandle {
    pub fn id(&self) -> &UserId {
        self.cache.id()
    }

    /// The cached snapshot, if one exists for this user. Never blocks.
    pub fn cached_user(&self) -> Option<User> {
        if self.lockout.is_tripped() {
            return None;
        }
        self.cache.user()
    }

    /// The mutation waiting to be pushed, if any.
    pub fn pending_mutation(&self) -> Option<UserPatch> {
        if self.lockout.is_tripped() {
            return None;
        }
        self.cache.pending()
    }

    /// True while a refresh run is in flight.
    pub fn is_refreshing(&self) -> bool {
        *self.refreshing.borrow()
    }

    pub fn is_locked_out(&self) -> bool {
        self.lockout.is_tripped()
    }

    /// The lockout shared by every coordinator of this session.
    pub fn lockout(&self) -> &Lockout {
        &self.lockout
    }

    /// Queue a local change. Merged into the pending mutation and persisted;
    /// does not start a sync on its own.
    pub fn set_field(&self, field: UserField) {
        self.send(SyncCommand::SetField(field));
    }

    /// Ask for a refresh run. Coalesces with a run already in flight.
    pub fn refresh(&self, force_fetch: bool) {
        self.send(SyncCommand::Refresh { force_fetch });
    }

    /// Resolve once no run is in flight and no follow-up is scheduled.
    ///
    /// Commands sent before this call are processed first.
    pub async fn settled(&self) {
        let (reply, rx) = oneshot::channel();
        self.send(SyncCommand::Settled { reply });
        // A closed channel means the actor is gone, which is settled too.
        let _ = rx.await;
    }

    /// Subscribe to coordinator events. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn send(&self, cmd: SyncCommand) {
        if self.tx.send(cmd).is_err() {
            debug!(user = %self.id(), "Sync coordinator gone, dropping command");
        }
    }
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("id", self.id())
            .field("refreshing", &self.is_refreshing())
            .field("locked_out", &self.is_locked_out())
            .finish()
    }
}

// ============================================================================
// Run (one refresh cycle, polled on the actor task)
// ============================================================================

/// What a successful run did, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
enum RunOutcome {
    Fetched,
    FetchedAndUpdated,
    Created,
    Updated,
    UpToDate,
}

/// A classified remote failure inside a run.
#[derive(Debug)]
struct RunFailure {
    op: RemoteOp,
    error: RemoteError,
}

struct RunReport {
    /// Whether this run was a forced fetch (restored on failure).
    forced: bool,
    result: Result<RunOutcome, RunFailure>,
}

/// Everything one run needs, owned so the future is `'static`.
struct RunContext {
    id: UserId,
    cache: Arc<UserCache>,
    remote: Arc<dyn RemoteProvider>,
    lockout: Lockout,
    events: EventSink,
    first_run: bool,
    force: bool,
}

impl RunContext {
    async fn execute(self) -> RunReport {
        let result = self.sync().await;
        RunReport {
            forced: self.force,
            result,
        }
    }

    async fn sync(&self) -> Result<RunOutcome, RunFailure> {
        let cached = self.cache.user();

        if self.force || (cached.is_some() && self.first_run) {
            match self.fetch().await? {
                Some(user) => {
                    self.commit(&user, None);
                    return Ok(if self.push_pending().await? {
                        RunOutcome::FetchedAndUpdated
                    } else {
                        RunOutcome::Fetched
                    });
                }
                None => {
                    if cached.is_some() {
                        warn!("Remote has no record of cached user, recreating");
                        self.cache.set_user(None);
                    }
                    return self.create().await;
                }
            }
        }

        if cached.is_some() {
            return Ok(if self.push_pending().await? {
                RunOutcome::Updated
            } else {
                RunOutcome::UpToDate
            });
        }

        self.create().await
    }

    async fn fetch(&self) -> Result<Option<User>, RunFailure> {
        match self.remote.fetch(&self.id).await {
            Ok(user) => Ok(user),
            Err(RemoteError::NotFound) => Ok(None),
            Err(error) => Err(RunFailure {
                op: RemoteOp::Fetch,
                error,
            }),
        }
    }

    /// Push the pending mutation, if any. Returns whether an update was sent.
    async fn push_pending(&self) -> Result<bool, RunFailure> {
        let Some(snapshot) = self.cache.pending() else {
            return Ok(false);
        };
        debug!(fields = ?snapshot.field_names(), "Pushing pending mutation");
        let user = self
            .remote
            .update(&self.id, &snapshot)
            .await
            .map_err(|error| RunFailure {
                op: RemoteOp::Update,
                error,
            })?;
        self.commit(&user, Some(&snapshot));
        Ok(true)
    }

    async fn create(&self) -> Result<RunOutcome, RunFailure> {
        let snapshot = self.cache.pending();
        let seed = snapshot
            .clone()
            .unwrap_or_else(|| UserPatch::new(self.id.clone()));
        let user = self
            .remote
            .create(&self.id, &seed)
            .await
            .map_err(|error| RunFailure {
                op: RemoteOp::Create,
                error,
            })?;
        self.commit(&user, snapshot.as_ref());
        Ok(RunOutcome::Created)
    }

    /// Write a remote snapshot back and clear the mutation it carried.
    ///
    /// Skipped entirely once locked out: the cache was reset and must stay
    /// empty even if this run's request was already in flight.
    fn commit(&self, user: &User, sent: Option<&UserPatch>) {
        if !self.cache.commit(&self.lockout, user, sent) {
            debug!("Locked out mid-run, discarding response");
            return;
        }
        self.events.emit(SyncEvent::UserUpdated(user.clone()));
    }
}

// ============================================================================
// SyncActor (internal, owns all coordinator state)
// ============================================================================

struct SyncActor {
    id: UserId,
    cache: Arc<UserCache>,
    remote: Arc<dyn RemoteProvider>,
    gate: Option<Weak<dyn RefreshGate>>,
    lockout: Lockout,
    events: EventSink,
    has_completed_initial_sync: bool,
    /// Sticky: set by refreshes that could not run, consumed by the next run.
    wants_forced_fetch: bool,
    /// A refresh arrived while a run was active.
    rerun_requested: bool,
    run_lane: Lane<RunReport>,
    runs_started: u64,
    idle_waiters: Vec<oneshot::Sender<()>>,
}

impl SyncActor {
    /// Process commands and run completions until every handle is dropped
    /// and the last run has finished.
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SyncCommand>) {
        let mut open = true;
        while open || self.run_lane.is_active() {
            tokio::select! {
                // Commands first: anything queued before a run completes is
                // seen by that run's follow-up decision.
                biased;
                cmd = rx.recv(), if open => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => open = false,
                },
                report = self.run_lane.finished() => self.finish_run(report),
            }
        }
        debug!(user = %self.id, "Sync coordinator shutting down: channel closed");
    }

    fn handle_command(&mut self, cmd: SyncCommand) {
        match cmd {
            SyncCommand::SetField(field) => self.set_field(field),
            SyncCommand::Refresh { force_fetch } => self.request_refresh(force_fetch),
            SyncCommand::Settled { reply } => {
                if self.run_lane.is_active() {
                    self.idle_waiters.push(reply);
                } else {
                    let _ = reply.send(());
                }
            }
        }
    }

    fn set_field(&mut self, field: UserField) {
        let name = field.name();
        let id = &self.id;
        match self
            .cache
            .update_pending_unless_locked(&self.lockout, |existing| merge(existing, id, field))
        {
            Some(patch) => {
                debug!(user = %self.id, field = name, pending = ?patch.field_names(), "Queued local change")
            }
            None => debug!(user = %self.id, field = name, "Locked out, ignoring set_field"),
        }
    }

    fn request_refresh(&mut self, force_fetch: bool) {
        if self.lockout.is_tripped() {
            debug!(user = %self.id, "Locked out, ignoring refresh");
            return;
        }
        if !gate_allows(self.gate.as_ref()) {
            debug!(user = %self.id, force_fetch, "Refresh gated, deferring");
            self.wants_forced_fetch |= force_fetch;
            return;
        }
        if self.run_lane.is_active() {
            debug!(user = %self.id, force_fetch, "Run in flight, coalescing refresh");
            self.wants_forced_fetch |= force_fetch;
            self.rerun_requested = true;
            return;
        }
        self.start_run(force_fetch);
    }

    fn start_run(&mut self, force_fetch: bool) {
        let force = force_fetch || std::mem::take(&mut self.wants_forced_fetch);
        self.rerun_requested = false;
        self.runs_started += 1;

        let ctx = RunContext {
            id: self.id.clone(),
            cache: self.cache.clone(),
            remote: self.remote.clone(),
            lockout: self.lockout.clone(),
            events: self.events.clone(),
            first_run: !self.has_completed_initial_sync,
            force,
        };
        let span = info_span!("sync_run", user = %self.id, run = self.runs_started, force);
        self.run_lane.start(ctx.execute().instrument(span).boxed());
        self.events.emit(SyncEvent::RefreshingChanged(true));
    }

    fn finish_run(&mut self, report: RunReport) {
        let succeeded = match report.result {
            Ok(outcome) => {
                info!(user = %self.id, run = self.runs_started, %outcome, "Sync run complete");
                self.has_completed_initial_sync = true;
                true
            }
            Err(RunFailure { op, error }) => {
                warn!(user = %self.id, run = self.runs_started, %op, "Sync run failed: {error}");
                if error.is_terminal() {
                    self.lockout.engage(&self.cache, &self.events);
                } else if report.forced {
                    // The forced fetch never happened; keep asking for it.
                    self.wants_forced_fetch = true;
                }
                self.rerun_requested = false;
                self.events.emit(SyncEvent::Error { op, error });
                false
            }
        };
        self.events.emit(SyncEvent::RefreshingChanged(false));

        if succeeded && self.has_follow_up_work() {
            if gate_allows(self.gate.as_ref()) {
                info!(user = %self.id, "New work arrived during run, starting follow-up");
                self.start_run(false);
                return;
            }
            debug!(user = %self.id, "Follow-up gated, waiting for next refresh");
        }

        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn has_follow_up_work(&self) -> bool {
        !self.lockout.is_tripped()
            && (self.wants_forced_fetch || self.rerun_requested || self.cache.pending().is_some())
    }
}

// ============================================================================
// Public spawn function
// ============================================================================

/// Parts shared between the coordinators of one session.
pub(crate) struct Shared {
    pub(crate) cache: Arc<UserCache>,
    pub(crate) remote: Arc<dyn RemoteProvider>,
    pub(crate) lockout: Lockout,
    pub(crate) events: EventSink,
}

/// Spawn a sync coordinator on the current tokio runtime.
pub(crate) fn spawn_sync(shared: &Shared, gate: Option<Weak<dyn RefreshGate>>) -> SyncHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (run_lane, refreshing) = Lane::new();
    let actor = SyncActor {
        id: shared.cache.id().clone(),
        cache: shared.cache.clone(),
        remote: shared.remote.clone(),
        gate,
        lockout: shared.lockout.clone(),
        events: shared.events.clone(),
        has_completed_initial_sync: false,
        wants_forced_fetch: false,
        rerun_requested: false,
        run_lane,
        runs_started: 0,
        idle_waiters: Vec::new(),
    };
    tokio::spawn(actor.run(rx));
    SyncHandle {
        tx,
        cache: shared.cache.clone(),
        refreshing,
        lockout: shared.lockout.clone(),
        events: shared.events.clone(),
    }
}
