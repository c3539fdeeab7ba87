//! pulse-net: the TCP wire layer.
//!
//! Peer messages are JSON payloads framed as `[u32 big-endian length]
//! [payload]` with a 10 MiB cap. Two listeners run per node: the gossip
//! endpoint accepts fire-and-forget view pushes, and the peer query
//! endpoint answers partial-aggregate and raw-samples requests.
//!
//! Provides:
//! - `TcpGossipClient`: implements `GossipTransport` over TCP
//! - `TcpPeerClient`: implements `PeerClient` over TCP
//! - `serve_gossip` / `serve_peer`: the accept loops

pub mod client;
pub mod frame;
pub mod server;
pub mod wire;

pub use client::{TcpGossipClient, TcpPeerClient};
pub use frame::{read_frame, write_frame, NetError, MAX_FRAME_BYTES};
pub use server::{serve_gossip, serve_peer};
pub use wire::PeerRequest;
