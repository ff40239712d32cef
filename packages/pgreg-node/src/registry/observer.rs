//! Observer / Notification.
//!
//! Observers subscribe with their own [`Endpoint`] identity — the same
//! identity the Endpoint Monitor Registry tracks — so their death is
//! detected through the same substrate primitive rather than a bespoke
//! liveness channel. Delivery is a plain unbounded channel per observer:
//! sends preserve FIFO order, which is all the per-observer causal
//! ordering this needs.

use std::collections::HashMap;
use std::sync::Arc;

use pgreg_core::{Endpoint, EndpointLifecycle, MonitorRef};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::trace;

struct Subscriber {
    monitor_ref: MonitorRef,
    sender: mpsc::UnboundedSender<Vec<String>>,
    forwarder: JoinHandle<()>,
}

pub struct ObserverRegistry {
    lifecycle: Arc<dyn EndpointLifecycle>,
    subscribers: HashMap<Endpoint, Subscriber>,
    index: HashMap<MonitorRef, Endpoint>,
    death_tx: mpsc::UnboundedSender<MonitorRef>,
}

/// Outcome of [`ObserverRegistry::subscribe`] — an `ok | already_present`
/// return shape, not a plain bool, so a caller can tell idempotent
/// resubscription apart from a fresh subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed,
    AlreadyPresent,
}

impl ObserverRegistry {
    pub fn new(lifecycle: Arc<dyn EndpointLifecycle>, death_tx: mpsc::UnboundedSender<MonitorRef>) -> Self {
        Self {
            lifecycle,
            subscribers: HashMap::new(),
            index: HashMap::new(),
            death_tx,
        }
    }

    pub fn subscribe(
        &mut self,
        observer: Endpoint,
        sender: mpsc::UnboundedSender<Vec<String>>,
    ) -> SubscribeOutcome {
        if self.subscribers.contains_key(&observer) {
            return SubscribeOutcome::AlreadyPresent;
        }
        let (monitor_ref, death_rx) = self.lifecycle.monitor(&observer);
        let forwarder = Self::spawn_forwarder(monitor_ref, death_rx, self.death_tx.clone());
        self.index.insert(monitor_ref, observer.clone());
        self.subscribers.insert(
            observer.clone(),
            Subscriber { monitor_ref, sender, forwarder },
        );
        trace!(%observer, "observer subscribed");
        SubscribeOutcome::Subscribed
    }

    fn spawn_forwarder(
        monitor_ref: MonitorRef,
        death_rx: oneshot::Receiver<()>,
        death_tx: mpsc::UnboundedSender<MonitorRef>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            if death_rx.await.is_ok() {
                let _ = death_tx.send(monitor_ref);
            }
        })
    }

    /// Silently removes the observer behind `monitor_ref`, if any.
    pub fn remove_dead(&mut self, monitor_ref: MonitorRef) {
        if let Some(observer) = self.index.remove(&monitor_ref) {
            if let Some(sub) = self.subscribers.remove(&observer) {
                sub.forwarder.abort();
            }
            trace!(%observer, "observer removed after death notification");
        }
    }

    /// Dispatches `{update, delta}` to every live subscriber. A dead
    /// receiver (channel closed but death notification not yet delivered)
    /// is tolerated silently — `remove_dead` will clean it up shortly.
    pub fn notify(&self, delta: &[String]) {
        if delta.is_empty() {
            return;
        }
        for sub in self.subscribers.values() {
            let _ = sub.sender.send(delta.to_vec());
        }
    }

    #[cfg(test)]
    pub fn live_count(&self) -> usize {
        self.subscribers.len()
    }
}
