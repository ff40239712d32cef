//! Exchange Protocol: pairwise state-diff build and union-only merge.
//!
//! Pure, synchronous logic over the [`Table`] and [`MonitorRegistry`] — the
//! actor decides *when* to trigger an exchange (nodeup, peer hello, resync,
//! global_resync) and does the actual sending; this module only knows how
//! to build a payload for one peer and how to absorb one.

use pgreg_core::ExchangeGroup;

use super::monitor::MonitorRegistry;
use super::table::Table;

/// Builds the payload this node sends to `peer` — every locally-known
/// group, restricted to members whose home is `local_node` or `peer`.
pub fn build_payload(table: &Table, local_node: &str, peer: &str) -> Vec<ExchangeGroup> {
    let nodes = [local_node, peer];
    table
        .group_names()
        .into_iter()
        .map(|group| {
            let members = table.members_for_nodes(&group, &nodes);
            ExchangeGroup { group, members }
        })
        .collect()
}

/// Absorbs a peer's exchange payload. Union-only: never removes a member
/// on the basis of absence from `groups`. Returns the affected group names
/// for observer notification, deduplicated.
///
/// `connected` decides, per newly-joined endpoint, whether its home node is
/// currently connected — the Endpoint Monitor Registry needs this to pick
/// between a direct monitor and a helper worker.
pub fn merge_payload(
    table: &Table,
    monitor: &mut MonitorRegistry,
    connected: impl Fn(&str) -> bool,
    groups: Vec<ExchangeGroup>,
) -> Vec<String> {
    let mut affected = Vec::new();
    for ExchangeGroup { group, members } in groups {
        table.assure_group(&group);
        for endpoint in members {
            if table.has_member(&group, &endpoint) {
                continue;
            }
            let is_connected = connected(&endpoint.node);
            if let Some(delta) = table.join_group(monitor, is_connected, &group, &endpoint) {
                for name in delta {
                    if !affected.contains(&name) {
                        affected.push(name);
                    }
                }
            }
        }
    }
    affected
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgreg_core::Endpoint;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn new_monitor() -> MonitorRegistry {
        let (tx, _rx) = mpsc::unbounded_channel();
        MonitorRegistry::new(Arc::new(super::super::testutil::NullLifecycle::default()), tx)
    }

    #[tokio::test]
    async fn payload_only_carries_own_and_peer_members() {
        let table = Table::new("a");
        table.assure_group("g");
        let mut mon = new_monitor();
        table.join_group(&mut mon, true, "g", &Endpoint::new("w1", "a")).unwrap();
        table.join_group(&mut mon, true, "g", &Endpoint::new("w2", "b")).unwrap();
        table.join_group(&mut mon, true, "g", &Endpoint::new("w3", "c")).unwrap();

        let payload = build_payload(&table, "a", "b");
        assert_eq!(payload.len(), 1);
        let mut members = payload[0].members.clone();
        members.sort_by(|x, y| x.id.cmp(&y.id));
        assert_eq!(members, vec![Endpoint::new("w1", "a"), Endpoint::new("w2", "b")]);
    }

    #[tokio::test]
    async fn merge_is_union_only_and_creates_missing_groups() {
        let table = Table::new("a");
        let mut mon = new_monitor();
        let incoming = vec![ExchangeGroup {
            group: "g".to_string(),
            members: vec![Endpoint::new("w2", "b")],
        }];

        let affected = merge_payload(&table, &mut mon, |_| true, incoming);
        assert_eq!(affected, vec!["g".to_string()]);
        assert!(table.has_group("g"));
        assert_eq!(table.get_members("g").unwrap(), vec![Endpoint::new("w2", "b")]);

        // Re-merging the same payload is idempotent: no duplicate join.
        let incoming_again = vec![ExchangeGroup {
            group: "g".to_string(),
            members: vec![Endpoint::new("w2", "b")],
        }];
        let affected_again = merge_payload(&table, &mut mon, |_| true, incoming_again);
        assert!(affected_again.is_empty());
        assert_eq!(table.get_members("g").unwrap(), vec![Endpoint::new("w2", "b")]);
    }
}
