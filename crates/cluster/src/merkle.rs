//! Merkle digest for anti-entropy diagnostics.
//!
//! A binary tree over a lexicographically sorted leaf set. Leaf hashes
//! are SHA-256 of the leaf string; internal hashes are SHA-256 of the
//! two child hashes concatenated in sorted order, so the root is
//! independent of which side a subtree lands on. An odd node at any
//! level pairs with itself. Root comparison detects divergence in O(1);
//! `compare` walks mismatching subtrees to name the differing leaves.

use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum MerkleError {
    #[error("empty tree")]
    Empty,
    #[error("leaf not found in tree")]
    LeafNotFound,
}

#[derive(Debug, Clone)]
struct MerkleNode {
    hash: String,
    /// `Some(data)` for leaves, `None` for internal nodes.
    data: Option<String>,
    left: Option<usize>,
    right: Option<usize>,
}

/// A leaf-level difference found by [`MerkleTree::compare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafDiff {
    pub ours: Option<String>,
    pub theirs: Option<String>,
}

/// A Merkle tree over a set of leaf strings.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    nodes: Vec<MerkleNode>,
    root: Option<usize>,
}

impl MerkleTree {
    /// Build a tree from leaves. The input is sorted internally, so the
    /// same set always produces the same root.
    pub fn build(leaves: &[String]) -> Self {
        if leaves.is_empty() {
            return Self {
                nodes: Vec::new(),
                root: None,
            };
        }

        let mut sorted: Vec<&String> = leaves.iter().collect();
        sorted.sort();

        let mut nodes = Vec::with_capacity(sorted.len() * 2);
        let mut level: Vec<usize> = sorted
            .iter()
            .map(|data| {
                nodes.push(MerkleNode {
                    hash: hash_data(data),
                    data: Some((*data).clone()),
                    left: None,
                    right: None,
                });
                nodes.len() - 1
            })
            .collect();

        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut i = 0;
            while i < level.len() {
                let left = level[i];
                // An odd node out pairs with itself.
                let right = if i + 1 < level.len() { level[i + 1] } else { left };

                let hash = hash_pair(&nodes[left].hash, &nodes[right].hash);
                nodes.push(MerkleNode {
                    hash,
                    data: None,
                    left: Some(left),
                    right: Some(right),
                });
                next.push(nodes.len() - 1);
                i += 2;
            }
            level = next;
        }

        let root = Some(level[0]);
        Self { nodes, root }
    }

    /// The root hash, or the empty string for an empty tree.
    pub fn root_hash(&self) -> String {
        self.root
            .map(|idx| self.nodes[idx].hash.clone())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// All leaf data in tree (sorted) order.
    pub fn leaves(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(root) = self.root {
            self.collect_leaves(root, &mut out);
        }
        out
    }

    fn collect_leaves(&self, idx: usize, out: &mut Vec<String>) {
        let node = &self.nodes[idx];
        if let Some(ref data) = node.data {
            out.push(data.clone());
            return;
        }
        if let Some(left) = node.left {
            self.collect_leaves(left, out);
        }
        if let (Some(left), Some(right)) = (node.left, node.right) {
            if right != left {
                self.collect_leaves(right, out);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Compare
    // -----------------------------------------------------------------------

    /// The leaf-level differences between two trees, found by walking
    /// mismatching subtrees. Identical roots short-circuit to an empty
    /// list.
    pub fn compare(&self, other: &MerkleTree) -> Vec<LeafDiff> {
        match (self.root, other.root) {
            (None, None) => Vec::new(),
            (Some(_), None) => self
                .leaves()
                .into_iter()
                .map(|leaf| LeafDiff {
                    ours: Some(leaf),
                    theirs: None,
                })
                .collect(),
            (None, Some(_)) => other
                .leaves()
                .into_iter()
                .map(|leaf| LeafDiff {
                    ours: None,
                    theirs: Some(leaf),
                })
                .collect(),
            (Some(a), Some(b)) => {
                let mut diffs = Vec::new();
                self.compare_nodes(a, other, b, &mut diffs);
                diffs
            }
        }
    }

    fn compare_nodes(
        &self,
        ours: usize,
        other: &MerkleTree,
        theirs: usize,
        diffs: &mut Vec<LeafDiff>,
    ) {
        let a = &self.nodes[ours];
        let b = &other.nodes[theirs];
        if a.hash == b.hash {
            return;
        }

        match (&a.data, &b.data) {
            (Some(our_leaf), Some(their_leaf)) => {
                diffs.push(LeafDiff {
                    ours: Some(our_leaf.clone()),
                    theirs: Some(their_leaf.clone()),
                });
            }
            (None, None) => {
                if let (Some(al), Some(bl)) = (a.left, b.left) {
                    self.compare_nodes(al, other, bl, diffs);
                }
                // A self-paired odd node on both sides would repeat the
                // left comparison.
                let both_self_paired = a.left == a.right && b.left == b.right;
                if !both_self_paired {
                    if let (Some(ar), Some(br)) = (a.right, b.right) {
                        self.compare_nodes(ar, other, br, diffs);
                    }
                }
            }
            _ => {
                // Shape divergence (different leaf counts): pair the two
                // subtrees' leaves positionally.
                let mut ours_leaves = Vec::new();
                self.collect_leaves(ours, &mut ours_leaves);
                let mut theirs_leaves = Vec::new();
                other.collect_leaves(theirs, &mut theirs_leaves);

                let len = ours_leaves.len().max(theirs_leaves.len());
                for i in 0..len {
                    let pair = LeafDiff {
                        ours: ours_leaves.get(i).cloned(),
                        theirs: theirs_leaves.get(i).cloned(),
                    };
                    if pair.ours != pair.theirs {
                        diffs.push(pair);
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Proofs
    // -----------------------------------------------------------------------

    /// The sibling hashes proving `leaf` is in the tree, bottom-up.
    pub fn proof(&self, leaf: &str) -> Result<Vec<String>, MerkleError> {
        let root = self.root.ok_or(MerkleError::Empty)?;
        let target = hash_data(leaf);
        let mut proof = Vec::new();
        if self.find_proof(root, &target, &mut proof) {
            Ok(proof)
        } else {
            Err(MerkleError::LeafNotFound)
        }
    }

    fn find_proof(&self, idx: usize, target: &str, proof: &mut Vec<String>) -> bool {
        let node = &self.nodes[idx];
        if node.data.is_some() {
            return node.hash == target;
        }

        if let Some(left) = node.left {
            if self.find_proof(left, target, proof) {
                if let Some(right) = node.right {
                    proof.push(self.nodes[right].hash.clone());
                }
                return true;
            }
        }
        if let (Some(left), Some(right)) = (node.left, node.right) {
            if right != left && self.find_proof(right, target, proof) {
                proof.push(self.nodes[left].hash.clone());
                return true;
            }
        }
        false
    }
}

/// Replay a proof: fold the leaf hash with each sibling (sorted-order
/// concatenation) and compare against the root.
pub fn verify_proof(root_hash: &str, leaf: &str, proof: &[String]) -> bool {
    let mut current = hash_data(leaf);
    for sibling in proof {
        current = hash_pair(&current, sibling);
    }
    current == root_hash
}

fn hash_data(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// SHA-256 of `min(l, r) || max(l, r)`, making the parent independent
/// of child order.
fn hash_pair(left: &str, right: &str) -> String {
    let combined = if left <= right {
        format!("{left}{right}")
    } else {
        format!("{right}{left}")
    };
    hash_data(&combined)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
