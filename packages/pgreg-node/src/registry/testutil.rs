//! Shared test doubles for the `registry` submodules. Not compiled outside
//! `#[cfg(test)]`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use pgreg_core::{Endpoint, EndpointLifecycle, MonitorRef};
use tokio::sync::oneshot;

/// An [`EndpointLifecycle`] that hands out unique refs but never fires a
/// death notification on its own; tests trigger deaths explicitly by
/// dropping the sender they stash away, or simply never exercise death at
/// all when it isn't the thing under test.
#[derive(Default)]
pub struct NullLifecycle {
    next: AtomicU64,
    senders: Mutex<Vec<oneshot::Sender<()>>>,
}

impl EndpointLifecycle for NullLifecycle {
    fn monitor(&self, _endpoint: &Endpoint) -> (MonitorRef, oneshot::Receiver<()>) {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.senders.lock().unwrap().push(tx);
        (MonitorRef(id), rx)
    }

    fn demonitor_flush(&self, _reference: MonitorRef) {}
}
