//! Substrate contract.
//!
//! Everything in this module is a trait: the cluster transport, the
//! cluster-wide named lock, and the endpoint-liveness monitor are all
//! assumed to be provided by an underlying substrate and are deliberately
//! out of scope for this crate to implement. `pgreg-node` ships one
//! in-process implementation (`pgreg_node::local`) used for tests and for
//! running several simulated nodes in a single process; a real deployment
//! plugs in its own cluster transport, lock service, and monitor primitive.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::endpoint::Endpoint;
use crate::wire::{MutationAck, MutationRequest, PeerMessage, VerifierSnapshot};

// ---------------------------------------------------------------------------
// Node-up / node-down events
// ---------------------------------------------------------------------------

/// A node-up or node-down event from the cluster substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    NodeUp(String),
    NodeDown(String),
}

// ---------------------------------------------------------------------------
// Cluster-wide named lock
// ---------------------------------------------------------------------------

/// Composite key a mutation is serialized under: `(service-id, group-name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub service_id: String,
    pub group: String,
}

impl LockKey {
    pub fn new(service_id: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            group: group.into(),
        }
    }
}

/// A held lock. Dropping it releases the lock.
pub trait LockGuard: Send + Sync {}

// ---------------------------------------------------------------------------
// Substrate
// ---------------------------------------------------------------------------

/// The cluster transport + lock contract every Registry node depends on.
#[async_trait]
pub trait Substrate: Send + Sync {
    /// This node's own id.
    fn local_node(&self) -> &str;

    /// `true` if the substrate currently has a live connection to `node`.
    fn is_connected(&self, node: &str) -> bool;

    /// All nodes currently connected (excludes self).
    fn connected_nodes(&self) -> Vec<String>;

    /// Subscribes to node-up/node-down events.
    fn subscribe_events(&self) -> mpsc::UnboundedReceiver<ClusterEvent>;

    /// Best-effort addressed send of a gossip message to a named service on
    /// a remote node. Never blocks waiting for acknowledgement.
    async fn send(&self, node: &str, msg: PeerMessage) -> anyhow::Result<()>;

    /// Attempts to acquire the named lock, retrying up to `max_retries`
    /// times on `Aborted` outcomes. Returns `None` if every attempt aborted.
    async fn acquire_lock(&self, key: &LockKey, max_retries: u32) -> Option<Box<dyn LockGuard>>;

    /// The Mutation Coordinator's synchronous, per-call-timeout fan-out
    /// call to the Registry service on `node`.
    async fn call_mutation(
        &self,
        node: &str,
        req: MutationRequest,
        timeout: Duration,
    ) -> anyhow::Result<MutationAck>;

    /// The Verifier's read-only introspection RPC (no explicit timeout —
    /// relies on the substrate's own call timeout, if any).
    async fn call_verify(&self, node: &str, group: Option<String>) -> anyhow::Result<VerifierSnapshot>;
}

// ---------------------------------------------------------------------------
// Endpoint liveness monitor
// ---------------------------------------------------------------------------

/// Opaque handle returned by [`EndpointLifecycle::monitor`], used to
/// correlate a death notification back to the endpoint that died and to
/// demonitor later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorRef(pub u64);

/// The endpoint-liveness primitive.
///
/// Given an endpoint, delivers a one-shot notification when that endpoint
/// dies. `demonitor` with flush drains any notification already in flight
/// so a late death signal can never arrive after the monitor is believed
/// gone.
pub trait EndpointLifecycle: Send + Sync {
    /// Installs a monitor on `endpoint`, returning a handle and a one-shot
    /// receiver that resolves when the endpoint dies.
    fn monitor(&self, endpoint: &Endpoint) -> (MonitorRef, oneshot::Receiver<()>);

    /// Removes the monitor for `reference`, flushing any in-flight
    /// notification so it is never delivered after this call returns.
    fn demonitor_flush(&self, reference: MonitorRef);
}
