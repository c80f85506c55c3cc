//! Terminal authorization lockout shared between coordinators.
//!
//! Once tripped, a [`Lockout`] never resets. Every coordinator holding a
//! clone refuses further work; the host has to re-establish credentials and
//! build a fresh session with a fresh `Lockout`.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::error;

use crate::cache::UserCache;
use crate::events::{EventSink, SyncEvent};

#[derive(Clone, Debug)]
pub struct Lockout {
    tx: Arc<watch::Sender<bool>>,
}

impl Lockout {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_tripped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Trip the lockout. Returns `true` only for the call that tripped it.
    pub fn trip(&self) -> bool {
        self.tx.send_if_modified(|locked| {
            if *locked {
                false
            } else {
                *locked = true;
                true
            }
        })
    }

    /// Resolve once the lockout is tripped.
    pub async fn tripped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|locked| *locked).await;
    }

    /// Enter the locked-out state after an authorization failure: trip and
    /// drop the cached user and pending mutation under the cache's write
    /// lock, then announce it once.
    pub(crate) fn engage(&self, cache: &UserCache, events: &EventSink) {
        if cache.lock_out(self) {
            error!(user = %cache.id(), "Authorization rejected, coordinator locked out");
            events.emit(SyncEvent::LockedOut);
        }
    }
}

impl Default for Lockout {
    fn default() -> Self {
        Self::new()
    }
}
