//! TCP clients implementing the gossip and peer-query transports.

use crate::frame::{read_frame, write_json, NetError};
use crate::wire::{ErrorReply, PeerRequest};
use pulse_cluster::{GossipError, GossipMessage, GossipTransport};
use pulse_common::{Aggregate, NodeDescriptor};
use pulse_query::{PeerClient, PeerError, QueryRequest, SamplesResponse};
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Gossip client
// ---------------------------------------------------------------------------

/// Fire-and-forget gossip pushes over short-lived TCP connections.
#[derive(Debug, Clone)]
pub struct TcpGossipClient {
    deadline: Duration,
}

impl TcpGossipClient {
    pub fn new() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_deadline(deadline: Duration) -> Self {
        Self { deadline }
    }
}

impl Default for TcpGossipClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl GossipTransport for TcpGossipClient {
    async fn send_view(&self, addr: &str, message: &GossipMessage) -> Result<(), GossipError> {
        let send = async {
            let mut stream = TcpStream::connect(addr).await.map_err(io_to_gossip(addr))?;
            write_json(&mut stream, &PeerRequest::Gossip(message.clone()))
                .await
                .map_err(net_to_gossip(addr))?;
            Ok::<(), GossipError>(())
        };

        match timeout(self.deadline, send).await {
            Ok(result) => result,
            Err(_) => Err(GossipError::Timeout(addr.to_string())),
        }
    }
}

fn io_to_gossip(addr: &str) -> impl FnOnce(std::io::Error) -> GossipError + '_ {
    move |e| GossipError::SendFailed {
        addr: addr.to_string(),
        reason: e.to_string(),
    }
}

fn net_to_gossip(addr: &str) -> impl FnOnce(NetError) -> GossipError + '_ {
    move |e| GossipError::SendFailed {
        addr: addr.to_string(),
        reason: e.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Peer query client
// ---------------------------------------------------------------------------

/// Request/response peer queries over short-lived TCP connections.
#[derive(Debug, Clone)]
pub struct TcpPeerClient {
    deadline: Duration,
}

impl TcpPeerClient {
    pub fn new() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_deadline(deadline: Duration) -> Self {
        Self { deadline }
    }

    /// Send one request to `addr` and decode the single reply frame.
    async fn round_trip<T: DeserializeOwned>(
        &self,
        peer_id: &str,
        addr: &str,
        request: &PeerRequest,
    ) -> Result<T, PeerError> {
        let exchange = async {
            let mut stream = TcpStream::connect(addr)
                .await
                .map_err(|e| PeerError::Unreachable(peer_id.to_string(), e.to_string()))?;
            write_json(&mut stream, request)
                .await
                .map_err(|e| PeerError::Unreachable(peer_id.to_string(), e.to_string()))?;

            let payload = read_frame(&mut stream)
                .await
                .map_err(|e| PeerError::BadResponse(e.to_string()))?;

            match serde_json::from_slice::<T>(&payload) {
                Ok(value) => Ok(value),
                Err(_) => match serde_json::from_slice::<ErrorReply>(&payload) {
                    Ok(reply) => Err(PeerError::Remote(reply.error)),
                    Err(e) => Err(PeerError::BadResponse(e.to_string())),
                },
            }
        };

        match timeout(self.deadline, exchange).await {
            Ok(result) => result,
            Err(_) => Err(PeerError::Timeout(peer_id.to_string())),
        }
    }
}

impl Default for TcpPeerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PeerClient for TcpPeerClient {
    async fn partial_aggregate(
        &self,
        target: &NodeDescriptor,
        request: &QueryRequest,
    ) -> Result<Aggregate, PeerError> {
        self.round_trip(
            &target.id,
            &target.query_addr,
            &PeerRequest::Aggregate(request.clone()),
        )
        .await
    }

    async fn raw_samples(
        &self,
        target: &NodeDescriptor,
        request: &QueryRequest,
    ) -> Result<Vec<f64>, PeerError> {
        let response: SamplesResponse = self
            .round_trip(
                &target.id,
                &target.query_addr,
                &PeerRequest::Samples(request.clone()),
            )
            .await?;
        Ok(response.samples)
    }
}
