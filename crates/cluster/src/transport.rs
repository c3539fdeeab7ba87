//! Abstraction over the gossip wire transport.
//!
//! The concrete TCP implementation lives in `pulse-net`; tests use an
//! in-process mock.

use crate::view::GossipMessage;

#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    #[error("send to {addr} failed: {reason}")]
    SendFailed { addr: String, reason: String },
    #[error("send to {0} timed out")]
    Timeout(String),
}

/// Pushes one node's view at a peer. Gossip is fire-and-forget: the
/// response path is the peer's own gossip cycles.
#[async_trait::async_trait]
pub trait GossipTransport: Send + Sync + 'static {
    async fn send_view(&self, addr: &str, message: &GossipMessage) -> Result<(), GossipError>;
}
