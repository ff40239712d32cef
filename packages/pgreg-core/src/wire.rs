//! Inter-node wire messages for the process-group registry.
//!
//! Two distinct message families cross the wire:
//!
//! - [`PeerMessage`]: the gossip-style messages nodes push at each other
//!   outside of any particular mutation (`new_pg2` hello, `exchange`
//!   state-diff, `resync` trigger).
//! - [`MutationRequest`]/[`MutationAck`]: the payload and reply of the
//!   synchronous fan-out call the Mutation Coordinator issues under the
//!   group lock.
//!
//! Both use the `MsgPack` convention (`rmp_serde::to_vec_named`) and are
//! internally tagged the same way `ClusterMessage` is.

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;

// ---------------------------------------------------------------------------
// Exchange payload
// ---------------------------------------------------------------------------

/// One group's contribution to a pairwise `exchange` — only members whose
/// home node is the sender or the receiver, per the subsetting rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeGroup {
    pub group: String,
    pub members: Vec<Endpoint>,
}

// ---------------------------------------------------------------------------
// PeerMessage
// ---------------------------------------------------------------------------

/// Node-to-node gossip messages, addressed via the substrate's best-effort
/// messaging primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerMessage {
    /// Hello sent by a node's own startup to every peer it discovers.
    NewPg2 { from_node: String },
    /// Pairwise state-diff payload — see `ExchangeGroup`.
    Exchange {
        from_node: String,
        groups: Vec<ExchangeGroup>,
    },
    /// Instructs the receiver to re-send its state to all of its peers.
    Resync,
}

// ---------------------------------------------------------------------------
// Mutation fan-out payload
// ---------------------------------------------------------------------------

/// The operation carried by the Mutation Coordinator's synchronous fan-out
/// call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationRequest {
    Create { group: String },
    Delete { group: String },
    Join { group: String, endpoint: Endpoint },
    Leave { group: String, endpoint: Endpoint },
}

/// Reply from a node that served a fan-out mutation call.
///
/// Carries no payload beyond success — the coordinator never surfaces
/// per-node failures to its own caller; it only needs to
/// know whether this node answered at all before the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationAck;

// ---------------------------------------------------------------------------
// Verifier RPC payload
// ---------------------------------------------------------------------------

/// One node's answer to the verifier's read-only introspection RPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSnapshot {
    pub group: String,
    pub local_members: Vec<Endpoint>,
    pub full_members: Vec<Endpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifierSnapshot {
    pub node_id: String,
    pub groups: Vec<GroupSnapshot>,
}
