//! State Table.
//!
//! Holds the six core relations: Groups, Members, LocalMembers,
//! EndpointMonitor, MonitorIndex (both of the latter two delegated to
//! [`MonitorRegistry`]), and MaterialisedLists. The per-group row is
//! concurrency-safe (`DashMap` + `ArcSwap` cached projections, mirroring
//! `ClusterPartitionTable`/`ClusterState` in the cluster module this
//! crate descends from) so `get_members` and `get_local_members` can be
//! served as lock-free snapshot reads without round-tripping through the
//! actor mailbox, following the "snapshot vs scan"
//! guidance — only mutations are serialized through the actor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use pgreg_core::Endpoint;

use super::monitor::MonitorRegistry;

struct GroupEntry {
    /// Members relation: join-counter per endpoint, restricted to this group.
    members: HashMap<Endpoint, u32>,
    /// LocalMembers relation, restricted to this group.
    local_members: HashSet<Endpoint>,
    /// MaterialisedLists: full projection, duplicated per join-counter.
    full_list: ArcSwap<Vec<Endpoint>>,
    /// MaterialisedLists: local-only projection.
    local_list: ArcSwap<Vec<Endpoint>>,
}

impl GroupEntry {
    fn empty() -> Self {
        Self {
            members: HashMap::new(),
            local_members: HashSet::new(),
            full_list: ArcSwap::new(Arc::new(Vec::new())),
            local_list: ArcSwap::new(Arc::new(Vec::new())),
        }
    }
}

/// The Registry service's sole piece of mutable state.
pub struct Table {
    node_id: String,
    groups: DashMap<String, GroupEntry>,
    /// Reverse index: which groups an endpoint currently belongs to, so
    /// `member_died` need not scan every group.
    endpoint_groups: DashMap<Endpoint, HashSet<String>>,
}

impl Table {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            groups: DashMap::new(),
            endpoint_groups: DashMap::new(),
        }
    }

    // -- Reads (lock-free, no coordination) ---------------------------------

    pub fn has_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    pub fn group_names(&self) -> Vec<String> {
        self.groups.iter().map(|e| e.key().clone()).collect()
    }

    /// Groups with at least one locally-hosted member — used by the
    /// Exchange Protocol to decide which groups to offer a peer.
    pub fn local_group_names(&self) -> Vec<String> {
        self.groups
            .iter()
            .filter(|e| !e.value().local_members.is_empty())
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn get_members(&self, name: &str) -> Option<Vec<Endpoint>> {
        self.groups.get(name).map(|e| (*e.full_list.load_full()).clone())
    }

    pub fn get_local_members(&self, name: &str) -> Option<Vec<Endpoint>> {
        self.groups.get(name).map(|e| (*e.local_list.load_full()).clone())
    }

    pub fn has_member(&self, name: &str, endpoint: &Endpoint) -> bool {
        self.groups
            .get(name)
            .is_some_and(|e| e.members.contains_key(endpoint))
    }

    /// Members of `name` whose home node is one of `nodes` — the
    /// subsetting rule the Exchange Protocol uses.
    pub fn members_for_nodes(&self, name: &str, nodes: &[&str]) -> Vec<Endpoint> {
        self.groups.get(name).map_or_else(Vec::new, |e| {
            e.members
                .keys()
                .filter(|ep| nodes.contains(&ep.node.as_str()))
                .cloned()
                .collect()
        })
    }

    // -- Mutations (actor-only) ----------------------------------------------

    /// Idempotent upsert of an empty group row.
    pub fn assure_group(&self, name: &str) {
        self.groups.entry(name.to_string()).or_insert_with(GroupEntry::empty);
    }

    /// `join_group`. Pre: the group must already exist — callers map a
    /// `None` result to `no_such_group`.
    pub fn join_group(
        &self,
        monitor: &mut MonitorRegistry,
        connected: bool,
        name: &str,
        endpoint: &Endpoint,
    ) -> Option<Vec<String>> {
        {
            let mut entry = self.groups.get_mut(name)?;
            *entry.members.entry(endpoint.clone()).or_insert(0) += 1;
            if endpoint.is_local_to(&self.node_id) {
                entry.local_members.insert(endpoint.clone());
            }
        }
        monitor.increment(endpoint, connected);
        self.endpoint_groups
            .entry(endpoint.clone())
            .or_default()
            .insert(name.to_string());
        self.refresh_materialised(name);
        Some(vec![name.to_string()])
    }

    /// `leave_group`. Returns `[]` with no effect if the tuple is absent.
    pub fn leave_group(
        &self,
        monitor: &mut MonitorRegistry,
        name: &str,
        endpoint: &Endpoint,
    ) -> Vec<String> {
        let mut fully_removed = false;
        let existed = match self.groups.get_mut(name) {
            None => false,
            Some(mut entry) => match entry.members.get_mut(endpoint) {
                None => false,
                Some(counter) => {
                    *counter -= 1;
                    if *counter == 0 {
                        entry.members.remove(endpoint);
                        entry.local_members.remove(endpoint);
                        fully_removed = true;
                    }
                    true
                }
            },
        };
        if !existed {
            return Vec::new();
        }
        monitor.decrement(endpoint);
        if fully_removed {
            if let Some(mut groups) = self.endpoint_groups.get_mut(endpoint) {
                groups.remove(name);
            }
        }
        self.refresh_materialised(name);
        vec![name.to_string()]
    }

    /// `delete_group`. A no-op (empty delta) if the group is already gone.
    pub fn delete_group(&self, monitor: &mut MonitorRegistry, name: &str) -> Vec<String> {
        let Some((_, entry)) = self.groups.remove(name) else {
            return Vec::new();
        };
        for (endpoint, counter) in entry.members {
            for _ in 0..counter {
                monitor.decrement(&endpoint);
            }
            if let Some(mut groups) = self.endpoint_groups.get_mut(&endpoint) {
                groups.remove(name);
            }
        }
        vec![name.to_string()]
    }

    /// `member_died`. Leaves `endpoint` out of every group it belonged
    /// to, once per unit of its join-counter in that group.
    pub fn member_died(&self, monitor: &mut MonitorRegistry, endpoint: &Endpoint) -> Vec<String> {
        let Some((_, groups)) = self.endpoint_groups.remove(endpoint) else {
            return Vec::new();
        };
        let mut affected = Vec::new();
        for name in groups {
            let counter = self
                .groups
                .get(&name)
                .and_then(|e| e.members.get(endpoint).copied())
                .unwrap_or(0);
            for _ in 0..counter {
                if !self.leave_group(monitor, &name, endpoint).is_empty() && !affected.contains(&name) {
                    affected.push(name.clone());
                }
            }
        }
        affected
    }

    fn refresh_materialised(&self, name: &str) {
        if let Some(entry) = self.groups.get(name) {
            let mut full = Vec::with_capacity(entry.members.len());
            for (endpoint, &count) in &entry.members {
                for _ in 0..count {
                    full.push(endpoint.clone());
                }
            }
            let local: Vec<Endpoint> = entry.local_members.iter().cloned().collect();
            entry.full_list.store(Arc::new(full));
            entry.local_list.store(Arc::new(local));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn new_table_and_monitor() -> (Table, MonitorRegistry, mpsc::UnboundedReceiver<pgreg_core::MonitorRef>) {
        let (death_tx, death_rx) = mpsc::unbounded_channel();
        let lifecycle = Arc::new(super::super::testutil::NullLifecycle::default());
        (Table::new("node-a"), MonitorRegistry::new(lifecycle, death_tx), death_rx)
    }

    #[tokio::test]
    async fn single_node_create_join_join_leave_leave_leave() {
        let (table, mut mon, _rx) = new_table_and_monitor();
        table.assure_group("g");
        let e1 = Endpoint::new("w1", "node-a");

        table.join_group(&mut mon, true, "g", &e1).unwrap();
        table.join_group(&mut mon, true, "g", &e1).unwrap();
        assert_eq!(table.get_members("g").unwrap(), vec![e1.clone(), e1.clone()]);

        assert_eq!(table.leave_group(&mut mon, "g", &e1), vec!["g".to_string()]);
        assert_eq!(table.get_members("g").unwrap(), vec![e1.clone()]);

        assert_eq!(table.leave_group(&mut mon, "g", &e1), vec!["g".to_string()]);
        assert_eq!(table.get_members("g").unwrap(), Vec::<Endpoint>::new());

        // A third leave is a no-op, not an error.
        assert_eq!(table.leave_group(&mut mon, "g", &e1), Vec::<String>::new());
        assert_eq!(table.get_members("g").unwrap(), Vec::<Endpoint>::new());
        assert_eq!(mon.total(&e1), 0);
    }

    #[tokio::test]
    async fn join_requires_existing_group() {
        let (table, mut mon, _rx) = new_table_and_monitor();
        let e1 = Endpoint::new("w1", "node-a");
        assert!(table.join_group(&mut mon, true, "missing", &e1).is_none());
    }

    #[tokio::test]
    async fn local_members_restricted_to_home_node() {
        let (table, mut mon, _rx) = new_table_and_monitor();
        table.assure_group("g");
        let local = Endpoint::new("w1", "node-a");
        let remote = Endpoint::new("w2", "node-b");
        table.join_group(&mut mon, true, "g", &local).unwrap();
        table.join_group(&mut mon, false, "g", &remote).unwrap();

        assert_eq!(table.get_local_members("g").unwrap(), vec![local]);
        let mut full = table.get_members("g").unwrap();
        full.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(full, vec![Endpoint::new("w1", "node-a"), Endpoint::new("w2", "node-b")]);
    }

    #[tokio::test]
    async fn delete_group_releases_monitors_and_removes_members() {
        let (table, mut mon, _rx) = new_table_and_monitor();
        table.assure_group("g");
        let e1 = Endpoint::new("w1", "node-a");
        let e2 = Endpoint::new("w2", "node-a");
        table.join_group(&mut mon, true, "g", &e1).unwrap();
        table.join_group(&mut mon, true, "g", &e2).unwrap();

        let delta = table.delete_group(&mut mon, "g");
        assert_eq!(delta, vec!["g".to_string()]);
        assert!(!table.has_group("g"));
        assert_eq!(mon.live_count(), 0);
    }

    #[tokio::test]
    async fn member_died_removes_from_every_group_by_full_counter() {
        let (table, mut mon, _rx) = new_table_and_monitor();
        table.assure_group("g1");
        table.assure_group("g2");
        let e1 = Endpoint::new("w1", "node-a");
        table.join_group(&mut mon, true, "g1", &e1).unwrap();
        table.join_group(&mut mon, true, "g1", &e1).unwrap(); // counter 2 in g1
        table.join_group(&mut mon, true, "g2", &e1).unwrap(); // counter 1 in g2

        let mut affected = table.member_died(&mut mon, &e1);
        affected.sort();
        assert_eq!(affected, vec!["g1".to_string(), "g2".to_string()]);
        assert_eq!(table.get_members("g1").unwrap(), Vec::<Endpoint>::new());
        assert_eq!(table.get_members("g2").unwrap(), Vec::<Endpoint>::new());
        assert_eq!(mon.live_count(), 0);
    }

    use proptest::prelude::*;

    proptest! {
        /// N joins followed by N leaves of the same (group, endpoint)
        /// restore Members, LocalMembers, and the endpoint's monitor
        /// total to their pre-join state.
        #[test]
        fn join_leave_symmetry(n in 1u32..12) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let (table, mut mon, _rx) = new_table_and_monitor();
                table.assure_group("g");
                let e1 = Endpoint::new("w1", "node-a");

                for _ in 0..n {
                    table.join_group(&mut mon, true, "g", &e1).unwrap();
                }
                prop_assert_eq!(table.get_members("g").unwrap().len(), n as usize);
                prop_assert_eq!(table.get_local_members("g").unwrap(), vec![e1.clone()]);
                prop_assert_eq!(mon.total(&e1), n);

                for _ in 0..n {
                    table.leave_group(&mut mon, "g", &e1);
                }
                prop_assert_eq!(table.get_members("g").unwrap(), Vec::<Endpoint>::new());
                prop_assert_eq!(table.get_local_members("g").unwrap(), Vec::<Endpoint>::new());
                prop_assert_eq!(mon.total(&e1), 0);
                Ok(())
            })?;
        }
    }
}
