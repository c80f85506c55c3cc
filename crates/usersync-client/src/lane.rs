//! Single-flight execution slot.
//!
//! A [`Lane`] holds at most one in-flight future. The owning actor polls
//! [`Lane::finished`] inside `tokio::select!` next to its command channel, so
//! the "is something running" check and the start/finish flips all happen on
//! the actor's task and never race each other.

use futures::future::BoxFuture;
use tokio::sync::watch;

pub(crate) struct Lane<T> {
    active: Option<BoxFuture<'static, T>>,
    /// Mirrors `active.is_some()` for synchronous queries from handles.
    state: watch::Sender<bool>,
}

impl<T> Lane<T> {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (state, rx) = watch::channel(false);
        (Self { active: None, state }, rx)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Occupy the lane. Callers check [`Lane::is_active`] first.
    pub(crate) fn start(&mut self, fut: BoxFuture<'static, T>) {
        debug_assert!(self.active.is_none(), "lane already occupied");
        self.active = Some(fut);
        self.state.send_replace(true);
    }

    /// Resolve when the in-flight future completes; pending forever when idle.
    ///
    /// Cancel-safe: dropping this future leaves the in-flight work in place.
    pub(crate) async fn finished(&mut self) -> T {
        let out = match self.active.as_mut() {
            Some(fut) => fut.await,
            None => std::future::pending().await,
        };
        self.active = None;
        self.state.send_replace(false);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::time::Duration;

    #[tokio::test]
    async fn lane_tracks_activity() {
        let (mut lane, rx) = Lane::new();
        assert!(!lane.is_active());
        assert!(!*rx.borrow());

        lane.start(async { 7 }.boxed());
        assert!(lane.is_active());
        assert!(*rx.borrow());

        assert_eq!(lane.finished().await, 7);
        assert!(!lane.is_active());
        assert!(!*rx.borrow());
    }

    #[tokio::test]
    async fn idle_lane_never_resolves() {
        let (mut lane, _rx) = Lane::<()>::new();
        let res = tokio::time::timeout(Duration::from_millis(20), lane.finished()).await;
        assert!(res.is_err());
    }
}
