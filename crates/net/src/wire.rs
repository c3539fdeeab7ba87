//! Envelope types for peer-to-peer messages.

use pulse_cluster::GossipMessage;
use pulse_query::QueryRequest;
use serde::{Deserialize, Serialize};

/// One inbound message on either listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PeerRequest {
    /// A gossip view push. Fire-and-forget; no reply.
    Gossip(GossipMessage),
    /// Partial-aggregate request; replied with an `Aggregate`.
    Aggregate(QueryRequest),
    /// Raw-samples request; replied with a `SamplesResponse`.
    Samples(QueryRequest),
}

impl PeerRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            PeerRequest::Gossip(_) => "gossip",
            PeerRequest::Aggregate(_) => "aggregate",
            PeerRequest::Samples(_) => "samples",
        }
    }
}

/// Error reply body for a failed peer request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
}
