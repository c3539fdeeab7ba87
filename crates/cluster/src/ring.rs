//! Consistent-hash ring with virtual nodes.
//!
//! Each physical node owns `virtual_nodes` positions on a 32-bit ring,
//! derived from the CRC-32 of `"<id>#<i>"`. A key's owners are found by
//! hashing the key and walking clockwise from the first position at or
//! past the hash, collecting distinct node ids. Identical membership
//! always yields identical placement, and adding or removing one node
//! disturbs only the keys between it and its ring predecessor.

use std::collections::{BTreeMap, HashSet};

/// Default virtual nodes per physical node.
pub const DEFAULT_VIRTUAL_NODES: usize = 150;

/// The ring: sorted positions mapped to node ids, plus the set of
/// physical nodes.
#[derive(Debug, Clone)]
pub struct HashRing {
    positions: BTreeMap<u32, String>,
    nodes: HashSet<String>,
    virtual_nodes: usize,
}

impl HashRing {
    pub fn new(virtual_nodes: usize) -> Self {
        let virtual_nodes = if virtual_nodes == 0 {
            DEFAULT_VIRTUAL_NODES
        } else {
            virtual_nodes
        };
        Self {
            positions: BTreeMap::new(),
            nodes: HashSet::new(),
            virtual_nodes,
        }
    }

    /// Add a node and its virtual positions. Adding a present node is a
    /// no-op.
    pub fn add_node(&mut self, node_id: &str) {
        if !self.nodes.insert(node_id.to_string()) {
            return;
        }
        for i in 0..self.virtual_nodes {
            let position = hash_key(&format!("{node_id}#{i}"));
            self.positions.insert(position, node_id.to_string());
        }
    }

    /// Remove a node and every position mapped to it. Removing an absent
    /// node is a no-op.
    pub fn remove_node(&mut self, node_id: &str) {
        if !self.nodes.remove(node_id) {
            return;
        }
        self.positions.retain(|_, id| id != node_id);
    }

    /// The ordered owner list for a key: the primary first, then
    /// replicas in ring order. Returns `min(n, |nodes|)` distinct ids;
    /// an empty ring returns an empty list.
    pub fn owners(&self, key: &str, n: usize) -> Vec<String> {
        if self.nodes.is_empty() || n == 0 {
            return Vec::new();
        }
        let want = n.min(self.nodes.len());
        let hash = hash_key(key);

        let mut owners = Vec::with_capacity(want);
        let mut seen: HashSet<&str> = HashSet::with_capacity(want);

        // Clockwise walk: positions >= hash, wrapping to the start.
        let walk = self
            .positions
            .range(hash..)
            .chain(self.positions.range(..hash));
        for (_, node_id) in walk {
            if seen.insert(node_id) {
                owners.push(node_id.clone());
                if owners.len() == want {
                    break;
                }
            }
        }

        owners
    }

    /// The primary owner for a key, if the ring is non-empty.
    pub fn primary(&self, key: &str) -> Option<String> {
        self.owners(key, 1).into_iter().next()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains(node_id)
    }

    /// All physical node ids.
    pub fn nodes(&self) -> &HashSet<String> {
        &self.nodes
    }

    /// Number of physical nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }
}

/// 32-bit ring position of a key (IEEE CRC-32).
fn hash_key(key: &str) -> u32 {
    crc32fast::hash(key.as_bytes())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
