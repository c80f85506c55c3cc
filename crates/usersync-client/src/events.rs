//! Observer events and the refresh gate.
//!
//! Observers subscribe to a tokio broadcast channel; the host owns each
//! receiver and unsubscribes by dropping it. The coordinator never keeps an
//! observer alive. The refresh gate is held the same way, through a `Weak`
//! reference that stops counting once the host drops it.

use std::sync::Weak;

use tokio::sync::broadcast;
use usersync_types::User;

use crate::error::{RemoteError, RemoteOp};

/// Events pushed from the coordinators to observers.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    /// A fresh snapshot was written to the cache.
    UserUpdated(User),
    /// A refresh run started (`true`) or finished (`false`).
    RefreshingChanged(bool),
    /// An action started (`true`) or finished (`false`).
    ActionChanged(bool),
    /// A remote call failed.
    Error { op: RemoteOp, error: RemoteError },
    /// Authorization was rejected; every later command is a no-op.
    LockedOut,
}

/// Sending half shared by both coordinators of a session.
#[derive(Clone, Debug)]
pub(crate) struct EventSink {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventSink {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Fire and forget; having no subscribers is fine.
    pub(crate) fn emit(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }
}

/// External veto on starting a refresh run (reachability, rate limits, ...).
pub trait RefreshGate: Send + Sync {
    fn can_run_next_refresh(&self) -> bool;
}

impl<F> RefreshGate for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn can_run_next_refresh(&self) -> bool {
        self()
    }
}

/// Non-owning gate reference. A dropped gate no longer vetoes anything.
pub(crate) fn gate_allows(gate: Option<&Weak<dyn RefreshGate>>) -> bool {
    match gate.and_then(Weak::upgrade) {
        Some(gate) => gate.can_run_next_refresh(),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn dropped_gate_allows() {
        let gate: Arc<dyn RefreshGate> = Arc::new(|| false);
        let weak = Arc::downgrade(&gate);
        assert!(!gate_allows(Some(&weak)));
        drop(gate);
        assert!(gate_allows(Some(&weak)));
        assert!(gate_allows(None));
    }

    #[test]
    fn emit_without_subscribers_is_harmless() {
        let sink = EventSink::new(4);
        sink.emit(SyncEvent::RefreshingChanged(true));
        let mut rx = sink.subscribe();
        sink.emit(SyncEvent::LockedOut);
        assert_eq!(rx.try_recv().unwrap(), SyncEvent::LockedOut);
    }
}
