//! Verifier: cluster-wide state scrape and diff report. Never
//! mutates registry state; a per-node RPC failure is recorded as missing
//! data rather than raised.

use std::collections::HashMap;
use std::sync::Arc;

use pgreg_core::{Endpoint, GroupSnapshot, Substrate, VerifierSnapshot};
use tokio::task::JoinSet;
use tracing::warn;

/// One group's membership mismatch on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub group: String,
    pub node: String,
    pub missing: Vec<Endpoint>,
    pub extra: Vec<Endpoint>,
}

/// The verifier's full report.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub nodes: Vec<String>,
    pub groups: Vec<String>,
    pub diffs: Vec<DiffEntry>,
}

/// Scrapes `local_snapshot` plus every connected peer (concurrently, via
/// the substrate's read-only RPC) and computes the per-(group, node) diff
/// against the authoritative home-node view.
pub async fn verify_cluster_state(
    substrate: &Arc<dyn Substrate>,
    local_snapshot: VerifierSnapshot,
    group: Option<String>,
) -> VerifyReport {
    let mut snapshots: Vec<VerifierSnapshot> = vec![local_snapshot];

    let mut set: JoinSet<(String, anyhow::Result<VerifierSnapshot>)> = JoinSet::new();
    for peer in substrate.connected_nodes() {
        let substrate = Arc::clone(substrate);
        let group = group.clone();
        set.spawn(async move {
            let result = substrate.call_verify(&peer, group).await;
            (peer, result)
        });
    }
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((peer, Ok(snapshot))) => snapshots.push(snapshot),
            Ok((peer, Err(err))) => warn!(%peer, %err, "verifier RPC failed, recorded as missing"),
            Err(err) => warn!(%err, "verifier task panicked"),
        }
    }

    build_report(snapshots)
}

fn build_report(snapshots: Vec<VerifierSnapshot>) -> VerifyReport {
    let nodes: Vec<String> = snapshots.iter().map(|s| s.node_id.clone()).collect();

    // authoritative[group] = union of members each owning node reports as
    // local for that group.
    let mut authoritative: HashMap<String, Vec<Endpoint>> = HashMap::new();
    // claimed[(group, node)] = that node's full-member view of the group.
    let mut claimed: HashMap<(String, String), Vec<Endpoint>> = HashMap::new();
    let mut groups: Vec<String> = Vec::new();

    for snapshot in &snapshots {
        for GroupSnapshot { group, local_members, full_members } in &snapshot.groups {
            if !groups.contains(group) {
                groups.push(group.clone());
            }
            let bucket = authoritative.entry(group.clone()).or_default();
            for e in local_members {
                if !bucket.contains(e) {
                    bucket.push(e.clone());
                }
            }
            claimed.insert((group.clone(), snapshot.node_id.clone()), full_members.clone());
        }
    }

    let mut diffs = Vec::new();
    for group in &groups {
        let authoritative_set = authoritative.get(group).cloned().unwrap_or_default();
        for node in &nodes {
            let claimed_set = claimed.get(&(group.clone(), node.clone())).cloned().unwrap_or_default();
            let missing: Vec<Endpoint> = authoritative_set
                .iter()
                .filter(|e| !claimed_set.contains(e))
                .cloned()
                .collect();
            let extra: Vec<Endpoint> = claimed_set
                .iter()
                .filter(|e| !authoritative_set.contains(e))
                .cloned()
                .collect();
            if !missing.is_empty() || !extra.is_empty() {
                diffs.push(DiffEntry {
                    group: group.clone(),
                    node: node.clone(),
                    missing,
                    extra,
                });
            }
        }
    }

    VerifyReport { nodes, groups, diffs }
}
