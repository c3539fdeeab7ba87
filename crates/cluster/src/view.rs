//! The versioned cluster view and its merge rule.
//!
//! Every node holds a map of node id to descriptor plus a monotonic
//! version counter. Two views merge per node by last-write-wins on
//! `last_heartbeat`; an inbound message with a larger version raises the
//! local version but never overrides a per-node merge.

use pulse_common::{NodeDescriptor, NodeStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One node's picture of the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterView {
    pub nodes: HashMap<String, NodeDescriptor>,
    pub version: u64,
    pub replication_factor: usize,
}

impl ClusterView {
    pub fn new(replication_factor: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            version: 0,
            replication_factor,
        }
    }

    /// Insert or replace a descriptor outright (used for the local node).
    pub fn upsert(&mut self, descriptor: NodeDescriptor) {
        self.nodes.insert(descriptor.id.clone(), descriptor);
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeDescriptor> {
        self.nodes.get(node_id)
    }

    /// Ids of ACTIVE nodes other than `exclude`.
    pub fn active_peers(&self, exclude: &str) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| n.id != exclude && n.is_active())
            .map(|n| n.id.clone())
            .collect()
    }

    /// Merge a remote view into this one.
    ///
    /// Returns the ids of nodes not previously known, so the caller can
    /// log discoveries.
    pub fn merge(&mut self, remote: &ClusterView) -> Vec<String> {
        let mut discovered = Vec::new();

        for (node_id, remote_node) in &remote.nodes {
            match self.nodes.get_mut(node_id) {
                None => {
                    self.nodes.insert(node_id.clone(), remote_node.clone());
                    discovered.push(node_id.clone());
                }
                Some(local_node) => {
                    if local_node.is_superseded_by(remote_node) {
                        local_node.last_heartbeat = remote_node.last_heartbeat;
                        local_node.status = remote_node.status;
                        local_node.gossip_addr = remote_node.gossip_addr.clone();
                        local_node.query_addr = remote_node.query_addr.clone();
                        local_node.bus_addr = remote_node.bus_addr.clone();
                    }
                }
            }
        }

        if remote.version > self.version {
            self.version = remote.version;
        }

        discovered
    }

    /// Set a node's status, returning `true` if it changed.
    pub fn set_status(&mut self, node_id: &str, status: NodeStatus) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(node) if node.status != status => {
                node.status = status;
                true
            }
            _ => false,
        }
    }
}

/// One gossip round's payload: the sender's whole view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipMessage {
    pub state: ClusterView,
    pub from: String,
    pub version: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, heartbeat: u64, status: NodeStatus) -> NodeDescriptor {
        NodeDescriptor {
            id: id.to_string(),
            gossip_addr: format!("127.0.0.1:9{id}"),
            query_addr: format!("127.0.0.1:8{id}"),
            bus_addr: "tcp://localhost:1883".to_string(),
            last_heartbeat: heartbeat,
            status,
        }
    }

    #[test]
    fn test_merge_adds_unknown_nodes() {
        let mut local = ClusterView::new(2);
        local.upsert(descriptor("a", 100, NodeStatus::Active));

        let mut remote = ClusterView::new(2);
        remote.upsert(descriptor("b", 50, NodeStatus::Active));

        let discovered = local.merge(&remote);
        assert_eq!(discovered, vec!["b".to_string()]);
        assert!(local.get("b").is_some());
        assert!(local.get("a").is_some());
    }

    #[test]
    fn test_merge_newer_heartbeat_wins() {
        let mut local = ClusterView::new(2);
        local.upsert(descriptor("a", 100, NodeStatus::Suspect));

        let mut remote = ClusterView::new(2);
        remote.upsert(descriptor("a", 200, NodeStatus::Active));

        local.merge(&remote);
        let node = local.get("a").unwrap();
        assert_eq!(node.last_heartbeat, 200);
        assert_eq!(node.status, NodeStatus::Active);
    }

    #[test]
    fn test_merge_older_heartbeat_ignored() {
        let mut local = ClusterView::new(2);
        local.upsert(descriptor("a", 300, NodeStatus::Active));

        let mut remote = ClusterView::new(2);
        remote.upsert(descriptor("a", 100, NodeStatus::Down));

        local.merge(&remote);
        let node = local.get("a").unwrap();
        assert_eq!(node.last_heartbeat, 300);
        assert_eq!(node.status, NodeStatus::Active);
    }

    #[test]
    fn test_merge_is_commutative() {
        let build = |heartbeats: &[(&str, u64, NodeStatus)]| {
            let mut view = ClusterView::new(2);
            for &(id, hb, status) in heartbeats {
                view.upsert(descriptor(id, hb, status));
            }
            view
        };

        let a = build(&[
            ("n1", 100, NodeStatus::Active),
            ("n2", 250, NodeStatus::Suspect),
        ]);
        let b = build(&[
            ("n1", 180, NodeStatus::Down),
            ("n3", 90, NodeStatus::Active),
        ]);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        assert_eq!(ab.nodes, ba.nodes);
    }

    #[test]
    fn test_merge_raises_version_only_upward() {
        let mut local = ClusterView::new(2);
        local.version = 10;

        let mut remote = ClusterView::new(2);
        remote.version = 7;
        local.merge(&remote);
        assert_eq!(local.version, 10);

        remote.version = 42;
        local.merge(&remote);
        assert_eq!(local.version, 42);
    }

    #[test]
    fn test_active_peers_excludes_self_and_inactive() {
        let mut view = ClusterView::new(2);
        view.upsert(descriptor("me", 1, NodeStatus::Active));
        view.upsert(descriptor("peer", 1, NodeStatus::Active));
        view.upsert(descriptor("down", 1, NodeStatus::Down));
        view.upsert(descriptor("sus", 1, NodeStatus::Suspect));

        let peers = view.active_peers("me");
        assert_eq!(peers, vec!["peer".to_string()]);
    }

    #[test]
    fn test_set_status() {
        let mut view = ClusterView::new(2);
        view.upsert(descriptor("a", 1, NodeStatus::Active));

        assert!(view.set_status("a", NodeStatus::Suspect));
        assert!(!view.set_status("a", NodeStatus::Suspect));
        assert!(!view.set_status("missing", NodeStatus::Down));
    }

    #[test]
    fn test_gossip_message_json_shape() {
        let mut view = ClusterView::new(3);
        view.upsert(descriptor("a", 123, NodeStatus::Active));
        view.version = 5;

        let msg = GossipMessage {
            state: view,
            from: "a".to_string(),
            version: 5,
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["from"], "a");
        assert_eq!(json["version"], 5);
        assert_eq!(json["state"]["replication_factor"], 3);
        assert_eq!(json["state"]["nodes"]["a"]["status"], "active");

        let back: GossipMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.state.nodes.len(), 1);
    }
}
