//! Endpoint Monitor Registry.
//!
//! Ref-counted endpoint monitors: installs a direct monitor when the
//! endpoint's home node is reachable, or a dedicated helper task when it
//! is not yet connected — the helper isolates whatever blocking behaviour
//! a real substrate's monitor primitive might exhibit against an
//! unconnected node, and can be aborted cleanly once no longer needed.
//! Owned exclusively by the actor task; see `registry::actor`.

use std::collections::HashMap;
use std::sync::Arc;

use pgreg_core::{Endpoint, EndpointLifecycle, MonitorRef};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::trace;

/// How a monitor on a given endpoint was installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watcher {
    /// The monitor primitive was installed directly against the endpoint.
    Direct,
    /// A helper task brokered the monitor because the endpoint's node was
    /// not yet connected at install time.
    Helper,
}

struct MonitorEntry {
    monitor_ref: MonitorRef,
    watcher: Watcher,
    /// Sum of this endpoint's join-counters across every group it belongs to.
    total: u32,
    /// Task forwarding the substrate's one-shot death signal back to the actor.
    forwarder: JoinHandle<()>,
}

/// Tracks `EndpointMonitor` and `MonitorIndex`.
pub struct MonitorRegistry {
    lifecycle: Arc<dyn EndpointLifecycle>,
    entries: HashMap<Endpoint, MonitorEntry>,
    index: HashMap<MonitorRef, Endpoint>,
    death_tx: mpsc::UnboundedSender<MonitorRef>,
}

impl MonitorRegistry {
    pub fn new(
        lifecycle: Arc<dyn EndpointLifecycle>,
        death_tx: mpsc::UnboundedSender<MonitorRef>,
    ) -> Self {
        Self {
            lifecycle,
            entries: HashMap::new(),
            index: HashMap::new(),
            death_tx,
        }
    }

    /// Total join-counter currently recorded for `endpoint`, if it has any
    /// live monitor (i.e. belongs to at least one group).
    pub fn total(&self, endpoint: &Endpoint) -> u32 {
        self.entries.get(endpoint).map_or(0, |e| e.total)
    }

    /// Increments the total-join-counter for `endpoint`, installing a
    /// monitor (direct or helper, depending on `connected`) on first join.
    pub fn increment(&mut self, endpoint: &Endpoint, connected: bool) {
        if let Some(entry) = self.entries.get_mut(endpoint) {
            entry.total += 1;
            return;
        }

        let (monitor_ref, death_rx) = self.lifecycle.monitor(endpoint);
        let watcher = if connected { Watcher::Direct } else { Watcher::Helper };
        let forwarder = Self::spawn_forwarder(monitor_ref, death_rx, self.death_tx.clone());

        self.entries.insert(
            endpoint.clone(),
            MonitorEntry {
                monitor_ref,
                watcher,
                total: 1,
                forwarder,
            },
        );
        self.index.insert(monitor_ref, endpoint.clone());
        trace!(%endpoint, ?watcher, "installed endpoint monitor");
    }

    /// Spawns the task that waits for the substrate's one-shot death
    /// signal and converts it into a local death event for the actor.
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

    /// Decrements the total-join-counter for `endpoint`. Releases the
    /// monitor (and kills any helper task) once it reaches zero. Returns
    /// the new total, or `None` if `endpoint` had no monitor to begin with.
    pub fn decrement(&mut self, endpoint: &Endpoint) -> Option<u32> {
        let total = {
            let entry = self.entries.get_mut(endpoint)?;
            entry.total = entry.total.saturating_sub(1);
            entry.total
        };
        if total == 0 {
            self.release(endpoint);
        }
        Some(total)
    }

    fn release(&mut self, endpoint: &Endpoint) {
        if let Some(entry) = self.entries.remove(endpoint) {
            self.lifecycle.demonitor_flush(entry.monitor_ref);
            entry.forwarder.abort();
            self.index.remove(&entry.monitor_ref);
            trace!(%endpoint, "released endpoint monitor");
        }
    }

    /// Resolves the endpoint a death notification refers to. The mapping
    /// is bijective over live monitor refs.
    pub fn resolve(&self, monitor_ref: MonitorRef) -> Option<Endpoint> {
        self.index.get(&monitor_ref).cloned()
    }

    #[cfg(test)]
    pub fn live_count(&self) -> usize {
        self.entries.len()
    }
}
