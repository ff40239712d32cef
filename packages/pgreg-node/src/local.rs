//! An in-process `Substrate` + `EndpointLifecycle` implementation, for
//! tests and for running several simulated nodes inside one process. A
//! real deployment plugs in its own cluster transport, lock service, and
//! endpoint-liveness primitive instead.
//!
//! Nodes that never call [`LocalCluster::join_node`] together are, from
//! each other's point of view, simply not connected yet — joining later
//! plays the role of a `nodeup` event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pgreg_core::{
    ClusterEvent, Endpoint, EndpointLifecycle, LockGuard, LockKey, MonitorRef, MutationAck,
    MutationRequest, PeerMessage, Substrate, VerifierSnapshot,
};
use tokio::sync::{mpsc, oneshot};

use crate::api::Registry;
use crate::config::RegistryConfig;

struct NodeHandle {
    registry: Registry,
    events: mpsc::UnboundedSender<ClusterEvent>,
}

#[derive(Default)]
struct ClusterState {
    nodes: HashMap<String, NodeHandle>,
}

/// Shared in-process cluster: every node joined to the same `LocalCluster`
/// can reach every other.
pub struct LocalCluster {
    state: Mutex<ClusterState>,
}

impl LocalCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(ClusterState::default()) })
    }

    /// Spawns a Registry for `node_id` wired to this cluster, then
    /// announces it to every already-joined node and backfills its own
    /// view of them — the in-process equivalent of a `nodeup` event firing
    /// on both sides of a new connection.
    pub async fn join_node(
        self: &Arc<Self>,
        node_id: impl Into<String>,
        lifecycle: Arc<dyn EndpointLifecycle>,
    ) -> Registry {
        let node_id = node_id.into();
        let substrate = Arc::new(LocalSubstrate::new(node_id.clone(), Arc::clone(self)));
        let config = RegistryConfig::new(node_id.clone());
        let (registry, _join) = Registry::spawn(config, Arc::clone(&substrate) as Arc<dyn Substrate>, lifecycle);

        // Forces the actor past its startup (and hence past its one call to
        // `subscribe_events`) before we read back the event sender below.
        registry.sync().await;
        let event_tx = substrate
            .event_sender()
            .expect("actor subscribes to cluster events before entering its event loop");

        let existing: Vec<(String, mpsc::UnboundedSender<ClusterEvent>)> = {
            let mut state = self.state.lock().unwrap();
            let existing = state
                .nodes
                .iter()
                .map(|(id, handle)| (id.clone(), handle.events.clone()))
                .collect();
            state.nodes.insert(
                node_id.clone(),
                NodeHandle { registry: registry.clone(), events: event_tx.clone() },
            );
            existing
        };

        for (peer_id, peer_events) in existing {
            let _ = peer_events.send(ClusterEvent::NodeUp(node_id.clone()));
            let _ = event_tx.send(ClusterEvent::NodeUp(peer_id));
        }

        registry
    }
}

struct LocalLockGuard(#[allow(dead_code)] tokio::sync::OwnedMutexGuard<()>);

impl LockGuard for LocalLockGuard {}

struct LocalSubstrate {
    local_node: String,
    cluster: Arc<LocalCluster>,
    event_tx: OnceLock<mpsc::UnboundedSender<ClusterEvent>>,
    locks: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl LocalSubstrate {
    fn new(local_node: String, cluster: Arc<LocalCluster>) -> Self {
        Self {
            local_node,
            cluster,
            event_tx: OnceLock::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn event_sender(&self) -> Option<mpsc::UnboundedSender<ClusterEvent>> {
        self.event_tx.get().cloned()
    }

    fn node(&self, node: &str) -> Option<Registry> {
        self.cluster.state.lock().unwrap().nodes.get(node).map(|h| h.registry.clone())
    }
}

#[async_trait]
impl Substrate for LocalSubstrate {
    fn local_node(&self) -> &str {
        &self.local_node
    }

    fn is_connected(&self, node: &str) -> bool {
        node != self.local_node && self.cluster.state.lock().unwrap().nodes.contains_key(node)
    }

    fn connected_nodes(&self) -> Vec<String> {
        self.cluster
            .state
            .lock()
            .unwrap()
            .nodes
            .keys()
            .filter(|id| *id != &self.local_node)
            .cloned()
            .collect()
    }

    fn subscribe_events(&self) -> mpsc::UnboundedReceiver<ClusterEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.event_tx.set(tx).expect("subscribe_events called more than once");
        rx
    }

    async fn send(&self, node: &str, msg: PeerMessage) -> anyhow::Result<()> {
        let registry = self.node(node).ok_or_else(|| anyhow::anyhow!("unknown node {node}"))?;
        registry.deliver_peer_message(msg);
        Ok(())
    }

    async fn acquire_lock(&self, key: &LockKey, _max_retries: u32) -> Option<Box<dyn LockGuard>> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap();
            Arc::clone(locks.entry(key.clone()).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))))
        };
        let guard = mutex.lock_owned().await;
        Some(Box::new(LocalLockGuard(guard)))
    }

    async fn call_mutation(&self, node: &str, req: MutationRequest, timeout: Duration) -> anyhow::Result<MutationAck> {
        let registry = self.node(node).ok_or_else(|| anyhow::anyhow!("unknown node {node}"))?;
        tokio::time::timeout(timeout, registry.apply_remote_mutation(req)).await??;
        Ok(MutationAck)
    }

    async fn call_verify(&self, node: &str, group: Option<String>) -> anyhow::Result<VerifierSnapshot> {
        let registry = self.node(node).ok_or_else(|| anyhow::anyhow!("unknown node {node}"))?;
        Ok(registry.local_snapshot(group))
    }
}

/// An in-process, shared [`EndpointLifecycle`]: multiple independent
/// monitors may be installed on the same endpoint (one per node that
/// joined it, matching real deployments where each node monitors an
/// endpoint on its own); [`LocalLifecycle::kill`] fires every outstanding
/// monitor on that endpoint at once.
#[derive(Default)]
pub struct LocalLifecycle {
    next_ref: AtomicU64,
    watchers: Mutex<HashMap<Endpoint, Vec<(MonitorRef, oneshot::Sender<()>)>>>,
}

impl LocalLifecycle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulates the death of `endpoint`: fires every monitor installed on
    /// it, on every node, exactly once.
    pub fn kill(&self, endpoint: &Endpoint) {
        if let Some(watchers) = self.watchers.lock().unwrap().remove(endpoint) {
            for (_, tx) in watchers {
                let _ = tx.send(());
            }
        }
    }
}

impl EndpointLifecycle for LocalLifecycle {
    fn monitor(&self, endpoint: &Endpoint) -> (MonitorRef, oneshot::Receiver<()>) {
        let id = MonitorRef(self.next_ref.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.watchers.lock().unwrap().entry(endpoint.clone()).or_default().push((id, tx));
        (id, rx)
    }

    fn demonitor_flush(&self, reference: MonitorRef) {
        let mut watchers = self.watchers.lock().unwrap();
        watchers.retain(|_, v| {
            v.retain(|(r, _)| *r != reference);
            !v.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::registry::verifier::DiffEntry;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn single_node_create_join_leave() {
        let cluster = LocalCluster::new();
        let lifecycle = LocalLifecycle::new();
        let node_a = cluster.join_node("a", lifecycle).await;

        node_a.create("g").await.unwrap();
        let e1 = Endpoint::new("w1", "a");
        node_a.join("g", e1.clone()).await.unwrap();
        node_a.join("g", e1.clone()).await.unwrap();
        assert_eq!(node_a.get_members("g").unwrap(), vec![e1.clone(), e1.clone()]);

        node_a.leave("g", e1.clone()).await.unwrap();
        assert_eq!(node_a.get_members("g").unwrap(), vec![e1.clone()]);
        node_a.leave("g", e1.clone()).await.unwrap();
        assert_eq!(node_a.get_members("g").unwrap(), Vec::<Endpoint>::new());
        node_a.leave("g", e1).await.unwrap();
    }

    #[tokio::test]
    async fn cross_node_exchange_converges() {
        let cluster = LocalCluster::new();
        let lifecycle = LocalLifecycle::new();
        let node_a = cluster.join_node("a", lifecycle.clone()).await;
        node_a.create("g").await.unwrap();
        let e1 = Endpoint::new("w1", "a");
        node_a.join("g", e1.clone()).await.unwrap();

        let node_b = cluster.join_node("b", lifecycle).await;
        node_b.create("g").await.unwrap();
        let e2 = Endpoint::new("w2", "b");
        node_b.join("g", e2.clone()).await.unwrap();

        // nodeup-triggered exchange is async; give it a moment to settle.
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        node_a.sync().await;
        node_b.sync().await;

        let mut a_members = node_a.get_members("g").unwrap();
        a_members.sort_by(|x, y| x.id.cmp(&y.id));
        assert_eq!(a_members, vec![e1.clone(), e2.clone()]);
        assert_eq!(node_a.get_local_members("g").unwrap(), vec![e1.clone()]);
        assert_eq!(node_b.get_local_members("g").unwrap(), vec![e2.clone()]);
    }

    #[tokio::test]
    async fn endpoint_death_propagates() {
        let cluster = LocalCluster::new();
        let lifecycle = LocalLifecycle::new();
        let node_a = cluster.join_node("a", lifecycle.clone()).await;
        node_a.create("g").await.unwrap();
        let e1 = Endpoint::new("w1", "a");
        node_a.join("g", e1.clone()).await.unwrap();

        lifecycle.kill(&e1);
        node_a.sync().await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        assert_eq!(node_a.get_members("g").unwrap(), Vec::<Endpoint>::new());
    }

    #[tokio::test]
    async fn verifier_reports_missing_member() {
        let cluster = LocalCluster::new();
        let lifecycle = LocalLifecycle::new();
        let node_a = cluster.join_node("a", lifecycle.clone()).await;
        node_a.create("g").await.unwrap();
        let e1 = Endpoint::new("w1", "a");
        node_a.join("g", e1.clone()).await.unwrap();

        // node B joins the group locally only through its own direct apply,
        // bypassing exchange, to simulate a stuck split.
        let node_b = cluster.join_node("b", lifecycle).await;
        node_b.create("g").await.unwrap();

        let report = node_a.verify_cluster_state(Some("g".to_string())).await;
        let missing_on_b = report
            .diffs
            .iter()
            .find(|d: &&DiffEntry| d.node == "b")
            .expect("B should be reported as missing E1");
        assert_eq!(missing_on_b.missing, vec![e1]);
    }

    #[tokio::test]
    async fn delete_removes_members_and_group() {
        let cluster = LocalCluster::new();
        let lifecycle = LocalLifecycle::new();
        let node_a = cluster.join_node("a", lifecycle).await;
        node_a.create("g").await.unwrap();
        let e1 = Endpoint::new("w1", "a");
        let e2 = Endpoint::new("w2", "a");
        node_a.join("g", e1).await.unwrap();
        node_a.join("g", e2).await.unwrap();

        node_a.delete("g").await.unwrap();

        assert!(!node_a.which_groups().contains(&"g".to_string()));
        assert!(matches!(node_a.get_members("g"), Err(RegistryError::NoSuchGroup(_))));
    }

    #[tokio::test]
    async fn new_pg2_greeting_triggers_exchange_back_to_sender() {
        let cluster = LocalCluster::new();
        let lifecycle = LocalLifecycle::new();
        let node_a = cluster.join_node("a", lifecycle.clone()).await;
        node_a.create("g").await.unwrap();
        let node_b = cluster.join_node("b", lifecycle).await;
        node_b.create("g").await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        node_a.sync().await;
        node_b.sync().await;

        // A new member joins on A after the nodeup-driven exchange already
        // settled, so B has no way to learn about it short of a fresh greeting.
        let e3 = Endpoint::new("w3", "a");
        node_a.join("g", e3.clone()).await.unwrap();
        assert!(!node_b.get_members("g").unwrap().contains(&e3));

        // B greets A directly, as a freshly-started node would on its own
        // startup; A answers by exchanging its current state back to B.
        node_a.deliver_peer_message(PeerMessage::NewPg2 { from_node: "b".to_string() });
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        node_b.sync().await;

        assert!(node_b.get_members("g").unwrap().contains(&e3));
    }

    #[tokio::test]
    async fn global_resync_restores_convergence() {
        let cluster = LocalCluster::new();
        let lifecycle = LocalLifecycle::new();
        let node_a = cluster.join_node("a", lifecycle.clone()).await;
        node_a.create("g").await.unwrap();
        let e1 = Endpoint::new("w1", "a");
        node_a.join("g", e1.clone()).await.unwrap();

        // B joins after A already owns E1; checked before the nodeup-driven
        // exchange has had a chance to run, to catch the divergence window
        // that global_resync is meant to close.
        let node_b = cluster.join_node("b", lifecycle).await;
        node_b.create("g").await.unwrap();
        assert!(node_b.get_members("g").unwrap().is_empty());

        // B asks every connected peer (A) to push its own state back out;
        // A answers by exchanging E1 to B.
        let signalled = node_b.global_resync().await;
        assert_eq!(signalled, 1);
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        node_b.sync().await;

        assert_eq!(node_b.get_members("g").unwrap(), vec![e1]);
    }
}
