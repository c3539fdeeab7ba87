//! Abstraction over peer-to-peer query RPCs.
//!
//! Same pattern as the gossip transport: a trait in the domain crate,
//! with the TCP implementation in `pulse-net` and mocks in tests.

use crate::api::QueryRequest;
use pulse_common::{Aggregate, NodeDescriptor};

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer {0} unreachable: {1}")]
    Unreachable(String, String),
    #[error("peer {0} timed out")]
    Timeout(String),
    #[error("peer returned an error: {0}")]
    Remote(String),
    #[error("malformed peer response: {0}")]
    BadResponse(String),
}

/// Fetches partial results from one owning peer.
#[async_trait::async_trait]
pub trait PeerClient: Send + Sync + 'static {
    /// `(sum, count, min, max)` over the peer's local slice of the
    /// series.
    async fn partial_aggregate(
        &self,
        target: &NodeDescriptor,
        request: &QueryRequest,
    ) -> Result<Aggregate, PeerError>;

    /// The peer's raw values for the diagnostics path.
    async fn raw_samples(
        &self,
        target: &NodeDescriptor,
        request: &QueryRequest,
    ) -> Result<Vec<f64>, PeerError>;
}
