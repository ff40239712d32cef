//! Mutation Coordinator: lock + fan-out pipeline for
//! create/delete/join/leave. Runs on the calling task, never on the actor
//! — it may block the caller up to the fan-out timeout, but the actor
//! itself must stay responsive.

use std::collections::HashSet;
use std::sync::Arc;

use pgreg_core::{LockKey, MutationRequest, Substrate};
use tracing::warn;

use crate::api::ActorHandle;
use crate::config::RegistryConfig;
use crate::error::RegistryResult;

pub struct Coordinator {
    substrate: Arc<dyn Substrate>,
    handle: ActorHandle,
    config: RegistryConfig,
}

impl Coordinator {
    pub fn new(substrate: Arc<dyn Substrate>, handle: ActorHandle, config: RegistryConfig) -> Self {
        Self { substrate, handle, config }
    }

    /// Runs one mutation end to end: lock, fan out to every known node
    /// (including self), repair stragglers, and return the *local* apply
    /// result — the only place an input error (`no_such_group`) can
    /// surface to the caller.
    pub async fn mutate(&self, group: &str, req: MutationRequest) -> RegistryResult<Vec<String>> {
        let lock_key = LockKey::new(&self.config.service_id, group);
        loop {
            match self.substrate.acquire_lock(&lock_key, self.config.lock_max_retries).await {
                Some(guard) => {
                    let known_nodes: HashSet<String> = self.substrate.connected_nodes().into_iter().collect();
                    let result = self.fan_out(&known_nodes, req.clone()).await;
                    drop(guard);
                    return result;
                }
                None => {
                    warn!(group, "lock acquisition aborted after max retries, retrying from the top");
                }
            }
        }
    }

    async fn fan_out(&self, known_nodes: &HashSet<String>, req: MutationRequest) -> RegistryResult<Vec<String>> {
        let local_result = self.handle.apply_local(req.clone()).await;

        let mut bad_nodes = Vec::new();
        for node in known_nodes {
            match self
                .substrate
                .call_mutation(node, req.clone(), self.config.fan_out_timeout)
                .await
            {
                Ok(_ack) => {}
                Err(err) => {
                    warn!(%node, %err, "fan-out call failed, scheduling repair exchange");
                    bad_nodes.push(node.clone());
                }
            }
        }

        // Races with node-up: a node connected after the snapshot was taken
        // never received the fan-out at all.
        let now_connected: HashSet<String> = self.substrate.connected_nodes().into_iter().collect();
        for straggler in bad_nodes.iter().chain(now_connected.difference(known_nodes)) {
            self.handle.force_exchange(straggler.clone());
        }

        local_result
    }
}
