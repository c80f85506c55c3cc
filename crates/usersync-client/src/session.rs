//! Wiring for one user's coordinators.
//!
//! A [`UserSession`] pairs the sync coordinator with the action coordinator
//! over a single [`UserCache`], event channel, and [`Lockout`]. Sessions for
//! different users are independent and may sync in parallel.

use std::sync::{Arc, Weak};

use tokio::sync::broadcast;
use usersync_types::UserId;

use crate::action::{ActionHandle, spawn_actions};
use crate::cache::{ByteStore, UserCache};
use crate::config::ClientConfig;
use crate::constants::DEFAULT_EVENT_CAPACITY;
use crate::coordinator::{Shared, SyncHandle, spawn_sync};
use crate::events::{EventSink, RefreshGate, SyncEvent};
use crate::lockout::Lockout;
use crate::remote::RemoteProvider;

/// Builder for a [`UserSession`].
pub struct SessionBuilder {
    id: UserId,
    store: Arc<dyn ByteStore>,
    remote: Arc<dyn RemoteProvider>,
    gate: Option<Weak<dyn RefreshGate>>,
    lockout: Option<Lockout>,
    event_capacity: usize,
}

impl SessionBuilder {
    pub fn new(id: UserId, store: Arc<dyn ByteStore>, remote: Arc<dyn RemoteProvider>) -> Self {
        Self {
            id,
            store,
            remote,
            gate: None,
            lockout: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Apply settings from a loaded config.
    pub fn config(mut self, config: &ClientConfig) -> Self {
        self.event_capacity = config.event_capacity;
        self
    }

    /// Veto refresh runs through `gate`. Only a weak reference is kept; the
    /// host decides how long the gate lives.
    pub fn gate<G: RefreshGate + 'static>(mut self, gate: &Arc<G>) -> Self {
        let weak: Weak<dyn RefreshGate> = Arc::downgrade(gate) as Weak<G>;
        self.gate = Some(weak);
        self
    }

    /// Share an existing lockout, e.g. with another session for the same user.
    pub fn lockout(mut self, lockout: Lockout) -> Self {
        self.lockout = Some(lockout);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Spawn both coordinators on the current tokio runtime.
    pub fn spawn(self) -> UserSession {
        let shared = Shared {
            cache: Arc::new(UserCache::new(self.id, self.store)),
            remote: self.remote,
            lockout: self.lockout.unwrap_or_default(),
            events: EventSink::new(self.event_capacity),
        };
        let sync = spawn_sync(&shared, self.gate);
        let actions = spawn_actions(&shared);
        UserSession { sync, actions }
    }
}

/// The coordinators for one user.
#[derive(Clone, Debug)]
pub struct UserSession {
    pub sync: SyncHandle,
    pub actions: ActionHandle,
}

impl UserSession {
    pub fn builder(
        id: UserId,
        store: Arc<dyn ByteStore>,
        remote: Arc<dyn RemoteProvider>,
    ) -> SessionBuilder {
        SessionBuilder::new(id, store, remote)
    }

    pub fn id(&self) -> &UserId {
        self.sync.id()
    }

    /// Events from both coordinators.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sync.subscribe()
    }
}
