//! pulse-cluster: membership and partitioning.
//!
//! A gossip protocol maintains a versioned cluster view on every node;
//! a consistent-hash ring derived from that view gives every node the
//! same partitioning decisions without a coordinator. The Merkle digest
//! supports anti-entropy diagnostics off the write path.

pub mod gossip;
pub mod merkle;
pub mod ring;
pub mod transport;
pub mod view;

pub use gossip::{Gossip, GossipConfig};
pub use merkle::{verify_proof, LeafDiff, MerkleError, MerkleTree};
pub use ring::HashRing;
pub use transport::{GossipError, GossipTransport};
pub use view::{ClusterView, GossipMessage};
