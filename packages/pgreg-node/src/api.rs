//! Public API. `Registry` is the only type an embedding application
//! touches; everything under `registry/` is private plumbing.

use std::sync::Arc;

use pgreg_core::{Endpoint, EndpointLifecycle, MutationRequest, PeerMessage, Substrate, VerifierSnapshot};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub(crate) use crate::registry::actor::ActorHandle;
use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::registry::coordinator::Coordinator;
use crate::registry::observer::SubscribeOutcome;
use crate::registry::verifier::{self, VerifyReport};

/// A running Registry service on this node.
///
/// Cloning is cheap: every clone shares the same actor and table.
#[derive(Clone)]
pub struct Registry {
    handle: ActorHandle,
    coordinator: Arc<Coordinator>,
    substrate: Arc<dyn Substrate>,
}

/// `local_monitor(observer)`'s outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    Ok,
    AlreadyPresent,
}

impl Registry {
    /// Starts the actor and returns a handle plus its `JoinHandle` — keep
    /// the latter only if you want to await a (never-expected) actor
    /// crash; dropping it does not stop the actor.
    pub fn spawn(
        config: RegistryConfig,
        substrate: Arc<dyn Substrate>,
        lifecycle: Arc<dyn EndpointLifecycle>,
    ) -> (Self, JoinHandle<()>) {
        let (handle, join) = crate::registry::actor::spawn(config.clone(), Arc::clone(&substrate), lifecycle);
        let coordinator = Arc::new(Coordinator::new(Arc::clone(&substrate), handle.clone(), config));
        (
            Self { handle, coordinator, substrate },
            join,
        )
    }

    pub async fn create(&self, name: &str) -> RegistryResult<()> {
        self.coordinator
            .mutate(name, MutationRequest::Create { group: name.to_string() })
            .await?;
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> RegistryResult<()> {
        self.coordinator
            .mutate(name, MutationRequest::Delete { group: name.to_string() })
            .await?;
        Ok(())
    }

    pub async fn join(&self, name: &str, endpoint: Endpoint) -> RegistryResult<()> {
        self.coordinator
            .mutate(name, MutationRequest::Join { group: name.to_string(), endpoint })
            .await?;
        Ok(())
    }

    pub async fn leave(&self, name: &str, endpoint: Endpoint) -> RegistryResult<()> {
        self.coordinator
            .mutate(name, MutationRequest::Leave { group: name.to_string(), endpoint })
            .await?;
        Ok(())
    }

    pub fn get_members(&self, name: &str) -> RegistryResult<Vec<Endpoint>> {
        self.handle
            .table()
            .get_members(name)
            .ok_or_else(|| RegistryError::NoSuchGroup(name.to_string()))
    }

    pub fn get_local_members(&self, name: &str) -> RegistryResult<Vec<Endpoint>> {
        self.handle
            .table()
            .get_local_members(name)
            .ok_or_else(|| RegistryError::NoSuchGroup(name.to_string()))
    }

    pub fn which_groups(&self) -> Vec<String> {
        self.handle.table().group_names()
    }

    /// Picks a member to route a message to, preferring a local one.
    pub fn get_closest_pid(&self, name: &str) -> RegistryResult<Endpoint> {
        let local = self
            .handle
            .table()
            .get_local_members(name)
            .ok_or_else(|| RegistryError::NoSuchGroup(name.to_string()))?;
        if local.len() == 1 {
            return Ok(local[0].clone());
        }
        if !local.is_empty() {
            let idx = rand::rng().random_range(0..local.len());
            return Ok(local[idx].clone());
        }
        let full = self.handle.table().get_members(name).unwrap_or_default();
        if full.is_empty() {
            return Err(RegistryError::NoProcess(name.to_string()));
        }
        let idx = rand::rng().random_range(0..full.len());
        Ok(full[idx].clone())
    }

    /// Blocks until every event enqueued before this call has been applied.
    pub async fn sync(&self) {
        self.handle.sync().await;
    }

    /// Fire-and-forget: re-sends this node's state to every peer.
    pub fn resync(&self) {
        self.handle.fire_peer(PeerMessage::Resync);
    }

    /// Fans a `resync` trigger out to every known node; returns the count
    /// of nodes signalled.
    pub async fn global_resync(&self) -> usize {
        let nodes = self.substrate.connected_nodes();
        let mut signalled = 0;
        for node in &nodes {
            if self.substrate.send(node, PeerMessage::Resync).await.is_ok() {
                signalled += 1;
            }
        }
        signalled
    }

    pub async fn local_monitor(&self, observer: Endpoint, sink: mpsc::UnboundedSender<Vec<String>>) -> MonitorOutcome {
        match self.handle.subscribe(observer, sink).await {
            SubscribeOutcome::Subscribed => MonitorOutcome::Ok,
            SubscribeOutcome::AlreadyPresent => MonitorOutcome::AlreadyPresent,
        }
    }

    pub async fn verify_cluster_state(&self, group: Option<String>) -> VerifyReport {
        let snapshot = self.local_snapshot(group.clone());
        verifier::verify_cluster_state(&self.substrate, snapshot, group).await
    }

    /// Builds this node's answer to a peer's verifier RPC — exposed so the
    /// substrate/`local` implementation can serve `call_verify` without
    /// round-tripping through the actor mailbox (verifier reads, like all
    /// reads, need no coordination).
    pub fn local_snapshot(&self, group: Option<String>) -> VerifierSnapshot {
        let table = self.handle.table();
        let names = match &group {
            Some(name) => vec![name.clone()],
            None => table.group_names(),
        };
        let groups = names
            .into_iter()
            .filter_map(|name| {
                let full_members = table.get_members(&name)?;
                let local_members = table.get_local_members(&name)?;
                Some(pgreg_core::GroupSnapshot { group: name, local_members, full_members })
            })
            .collect();
        VerifierSnapshot { node_id: self.handle.node_id().to_string(), groups }
    }

    /// Delivers an inbound peer message — the substrate's receive path
    /// calls this for every `PeerMessage` addressed to this service.
    pub fn deliver_peer_message(&self, msg: PeerMessage) {
        self.handle.deliver_peer(msg);
    }

    /// Applies a single fan-out mutation on behalf of a remote coordinator
    /// — the substrate's `call_mutation` serving path calls this.
    pub async fn apply_remote_mutation(&self, req: MutationRequest) -> RegistryResult<()> {
        self.handle.apply_local(req).await?;
        Ok(())
    }
}
