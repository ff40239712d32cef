//! The single-consumer actor that owns all mutable Registry
//! state. Fed by a typed mailbox carrying the union of local mutation
//! requests, peer messages, substrate cluster events, and the two death
//! channels (member endpoints, observer endpoints). Never blocks: every
//! blocking operation (lock acquisition, fan-out, verifier RPC) lives on
//! the caller's task instead (`coordinator`, `verifier`, `api`).

use std::sync::Arc;

use pgreg_core::{ClusterEvent, Endpoint, EndpointLifecycle, MonitorRef, MutationRequest, PeerMessage, Substrate};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use super::exchange;
use super::monitor::MonitorRegistry;
use super::observer::{ObserverRegistry, SubscribeOutcome};
use super::table::Table;
use crate::error::{RegistryError, RegistryResult};

pub(crate) enum ActorEvent {
    ApplyMutation(MutationRequest, oneshot::Sender<RegistryResult<Vec<String>>>),
    Peer(PeerMessage),
    Cluster(ClusterEvent),
    Subscribe(Endpoint, mpsc::UnboundedSender<Vec<String>>, oneshot::Sender<SubscribeOutcome>),
    /// Round-trips through the mailbox so a caller can be sure every event
    /// enqueued before this one has been applied (`sync`).
    Ping(oneshot::Sender<()>),
}

/// Caller-facing handle into the actor. Reads bypass the mailbox entirely
/// (the table is lock-free); only mutating or stateful operations go
/// through `mailbox`.
#[derive(Clone)]
pub(crate) struct ActorHandle {
    mailbox: mpsc::Sender<ActorEvent>,
    table: Arc<Table>,
    node_id: String,
}

impl ActorHandle {
    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub async fn apply_local(&self, req: MutationRequest) -> RegistryResult<Vec<String>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.mailbox.send(ActorEvent::ApplyMutation(req, reply_tx)).await.is_err() {
            return Err(RegistryError::NoSuchGroup("actor shut down".to_string()));
        }
        reply_rx.await.unwrap_or_else(|_| Err(RegistryError::NoSuchGroup("actor shut down".to_string())))
    }

    pub async fn subscribe(&self, observer: Endpoint, sender: mpsc::UnboundedSender<Vec<String>>) -> SubscribeOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.mailbox.send(ActorEvent::Subscribe(observer, sender, reply_tx)).await.is_err() {
            return SubscribeOutcome::AlreadyPresent;
        }
        reply_rx.await.unwrap_or(SubscribeOutcome::AlreadyPresent)
    }

    pub async fn sync(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.mailbox.send(ActorEvent::Ping(reply_tx)).await.is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// Fire-and-forget enqueue of a peer message into this node's own
    /// actor, used by `resync()` to re-send state to all peers.
    pub fn fire_peer(&self, msg: PeerMessage) {
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            let _ = mailbox.send(ActorEvent::Peer(msg)).await;
        });
    }

    /// Enqueues a node-up equivalent for `node`, forcing a full exchange —
    /// the straggler-repair path the Mutation Coordinator uses.
    pub fn force_exchange(&self, node: String) {
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            let _ = mailbox.send(ActorEvent::Cluster(ClusterEvent::NodeUp(node))).await;
        });
    }

    /// Delivers an inbound peer message from the substrate's receive path.
    pub fn deliver_peer(&self, msg: PeerMessage) {
        self.fire_peer(msg);
    }

    /// Delivers a cluster event from the substrate's subscription stream.
    pub fn deliver_cluster_event(&self, event: ClusterEvent) {
        let mailbox = self.mailbox.clone();
        tokio::spawn(async move {
            let _ = mailbox.send(ActorEvent::Cluster(event)).await;
        });
    }
}

struct Core {
    table: Arc<Table>,
    monitor: MonitorRegistry,
    observers: ObserverRegistry,
    node_id: String,
}

impl Core {
    fn is_connected_or_self(&self, substrate: &dyn Substrate, node: &str) -> bool {
        node == self.node_id || substrate.is_connected(node)
    }

    fn apply_mutation(&mut self, substrate: &dyn Substrate, req: MutationRequest) -> RegistryResult<Vec<String>> {
        match req {
            MutationRequest::Create { group } => {
                self.table.assure_group(&group);
                Ok(vec![group])
            }
            MutationRequest::Delete { group } => Ok(self.table.delete_group(&mut self.monitor, &group)),
            MutationRequest::Join { group, endpoint } => {
                if !self.table.has_group(&group) {
                    return Err(RegistryError::NoSuchGroup(group));
                }
                let connected = self.is_connected_or_self(substrate, &endpoint.node);
                Ok(self
                    .table
                    .join_group(&mut self.monitor, connected, &group, &endpoint)
                    .unwrap_or_default())
            }
            MutationRequest::Leave { group, endpoint } => {
                if !self.table.has_group(&group) {
                    return Err(RegistryError::NoSuchGroup(group));
                }
                Ok(self.table.leave_group(&mut self.monitor, &group, &endpoint))
            }
        }
    }
}

pub(crate) fn spawn(
    config: crate::config::RegistryConfig,
    substrate: Arc<dyn Substrate>,
    lifecycle: Arc<dyn EndpointLifecycle>,
) -> (ActorHandle, tokio::task::JoinHandle<()>) {
    let table = Arc::new(Table::new(config.node_id.clone()));
    let (mailbox_tx, mailbox_rx) = mpsc::channel(config.mailbox_capacity);
    let (member_death_tx, member_death_rx) = mpsc::unbounded_channel();
    let (observer_death_tx, observer_death_rx) = mpsc::unbounded_channel();

    let core = Core {
        table: Arc::clone(&table),
        monitor: MonitorRegistry::new(Arc::clone(&lifecycle), member_death_tx),
        observers: ObserverRegistry::new(lifecycle, observer_death_tx),
        node_id: config.node_id.clone(),
    };

    let handle = ActorHandle {
        mailbox: mailbox_tx,
        table,
        node_id: config.node_id.clone(),
    };

    let join = tokio::spawn(run(core, substrate, mailbox_rx, member_death_rx, observer_death_rx));
    (handle, join)
}

async fn run(
    mut core: Core,
    substrate: Arc<dyn Substrate>,
    mut mailbox_rx: mpsc::Receiver<ActorEvent>,
    mut member_death_rx: mpsc::UnboundedReceiver<MonitorRef>,
    mut observer_death_rx: mpsc::UnboundedReceiver<MonitorRef>,
) {
    let mut events_rx = substrate.subscribe_events();
    announce_startup(&core, substrate.as_ref()).await;
    loop {
        tokio::select! {
            event = mailbox_rx.recv() => {
                match event {
                    Some(event) => handle_event(&mut core, substrate.as_ref(), event).await,
                    None => break,
                }
            }
            Some(monitor_ref) = member_death_rx.recv() => {
                handle_member_death(&mut core, monitor_ref);
            }
            Some(monitor_ref) = observer_death_rx.recv() => {
                core.observers.remove_dead(monitor_ref);
            }
            event = events_rx.recv() => {
                match event {
                    Some(event) => handle_cluster_event(&core, substrate.as_ref(), event).await,
                    None => {}
                }
            }
        }
    }
}

/// Greets every node already known to the substrate at startup, mirroring
/// `pg2`'s own `init/1` broadcasting `{new_pg2, node()}` to every node it
/// finds already running. Each recipient answers by exchanging its own
/// state back to us (see the `NewPg2` arm of `handle_peer_message`).
async fn announce_startup(core: &Core, substrate: &dyn Substrate) {
    let msg = PeerMessage::NewPg2 { from_node: core.node_id.clone() };
    for peer in substrate.connected_nodes() {
        if let Err(err) = substrate.send(&peer, msg.clone()).await {
            warn!(%peer, %err, "failed to send startup greeting");
        }
    }
}

async fn handle_event(core: &mut Core, substrate: &dyn Substrate, event: ActorEvent) {
    match event {
        ActorEvent::ApplyMutation(req, reply) => {
            debug!(?req, "applying mutation");
            let result = core.apply_mutation(substrate, req);
            if let Ok(delta) = &result {
                core.observers.notify(delta);
            }
            let _ = reply.send(result);
        }
        ActorEvent::Peer(msg) => handle_peer_message(core, substrate, msg).await,
        ActorEvent::Cluster(event) => handle_cluster_event(&*core, substrate, event).await,
        ActorEvent::Subscribe(observer, sender, reply) => {
            let outcome = core.observers.subscribe(observer, sender);
            let _ = reply.send(outcome);
        }
        ActorEvent::Ping(reply) => {
            let _ = reply.send(());
        }
    }
}

async fn handle_peer_message(core: &mut Core, substrate: &dyn Substrate, msg: PeerMessage) {
    match msg {
        PeerMessage::NewPg2 { from_node } => {
            send_exchange_to(&*core, substrate, &from_node).await;
        }
        PeerMessage::Exchange { from_node, groups } => {
            trace!(%from_node, "merging exchange payload");
            let node_id = core.node_id.clone();
            let delta = exchange::merge_payload(
                &core.table,
                &mut core.monitor,
                |n| n == node_id || substrate.is_connected(n),
                groups,
            );
            core.observers.notify(&delta);
        }
        PeerMessage::Resync => {
            for node in substrate.connected_nodes() {
                send_exchange_to(&*core, substrate, &node).await;
            }
        }
    }
}

async fn handle_cluster_event(core: &Core, substrate: &dyn Substrate, event: ClusterEvent) {
    match event {
        ClusterEvent::NodeUp(node) => send_exchange_to(core, substrate, &node).await,
        ClusterEvent::NodeDown(node) => {
            trace!(%node, "node down observed, awaiting endpoint-death propagation");
        }
    }
}

async fn send_exchange_to(core: &Core, substrate: &dyn Substrate, peer: &str) {
    let groups = exchange::build_payload(&core.table, &core.node_id, peer);
    let msg = PeerMessage::Exchange { from_node: core.node_id.clone(), groups };
    if let Err(err) = substrate.send(peer, msg).await {
        warn!(%peer, %err, "failed to send exchange payload");
    }
}

fn handle_member_death(core: &mut Core, monitor_ref: MonitorRef) {
    match core.monitor.resolve(monitor_ref) {
        Some(endpoint) => {
            let delta = core.table.member_died(&mut core.monitor, &endpoint);
            core.observers.notify(&delta);
        }
        None => {
            error!(?monitor_ref, "death notification for unknown monitor ref, invariant violated");
        }
    }
}
