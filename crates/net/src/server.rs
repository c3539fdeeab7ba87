//! Accept loops for the gossip and peer-query listeners.
//!
//! One task per inbound connection; a connection may carry several
//! frames in sequence and is dropped after 30 seconds of silence.

use crate::frame::{read_json, write_json, NetError};
use crate::wire::{ErrorReply, PeerRequest};
use pulse_cluster::{Gossip, GossipTransport};
use pulse_query::{PeerClient, QueryService, SamplesResponse};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Gossip listener
// ---------------------------------------------------------------------------

/// Serve inbound gossip pushes, merging each into the local view.
pub async fn serve_gossip<T: GossipTransport>(
    listener: TcpListener,
    gossip: Arc<Gossip<T>>,
) -> std::io::Result<()> {
    tracing::info!(
        "gossip listener on {}",
        listener.local_addr().map(|a| a.to_string()).unwrap_or_default()
    );

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let gossip = gossip.clone();
        tokio::spawn(async move {
            if let Err(e) = gossip_connection(stream, gossip).await {
                tracing::debug!("gossip connection from {peer_addr} closed: {e}");
            }
        });
    }
}

async fn gossip_connection<T: GossipTransport>(
    mut stream: TcpStream,
    gossip: Arc<Gossip<T>>,
) -> Result<(), NetError> {
    loop {
        let request: PeerRequest = match timeout(IDLE_TIMEOUT, read_json(&mut stream)).await {
            Ok(result) => result?,
            Err(_) => return Ok(()), // idle connection, drop it
        };

        pulse_metrics::metrics()
            .peer_requests_received
            .with_label_values(&[request.kind()])
            .inc();

        match request {
            PeerRequest::Gossip(message) => gossip.handle_message(message).await,
            other => {
                tracing::warn!(
                    "unexpected {} request on the gossip listener",
                    other.kind()
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Peer query listener
// ---------------------------------------------------------------------------

/// Serve partial-aggregate and raw-samples requests from peers.
pub async fn serve_peer<P: PeerClient>(
    listener: TcpListener,
    service: Arc<QueryService<P>>,
) -> std::io::Result<()> {
    tracing::info!(
        "peer query listener on {}",
        listener.local_addr().map(|a| a.to_string()).unwrap_or_default()
    );

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = peer_connection(stream, service).await {
                tracing::debug!("peer connection from {peer_addr} closed: {e}");
            }
        });
    }
}

async fn peer_connection<P: PeerClient>(
    mut stream: TcpStream,
    service: Arc<QueryService<P>>,
) -> Result<(), NetError> {
    loop {
        let request: PeerRequest = match timeout(IDLE_TIMEOUT, read_json(&mut stream)).await {
            Ok(result) => result?,
            Err(_) => return Ok(()),
        };

        pulse_metrics::metrics()
            .peer_requests_received
            .with_label_values(&[request.kind()])
            .inc();

        match request {
            PeerRequest::Aggregate(query) => match service.local_aggregate(&query).await {
                Ok(aggregate) => write_json(&mut stream, &aggregate).await?,
                Err(e) => {
                    write_json(
                        &mut stream,
                        &ErrorReply {
                            error: e.to_string(),
                        },
                    )
                    .await?
                }
            },
            PeerRequest::Samples(query) => match service.local_samples(&query).await {
                Ok(samples) => write_json(&mut stream, &SamplesResponse { samples }).await?,
                Err(e) => {
                    write_json(
                        &mut stream,
                        &ErrorReply {
                            error: e.to_string(),
                        },
                    )
                    .await?
                }
            },
            PeerRequest::Gossip(_) => {
                tracing::warn!("gossip push on the peer query listener, ignoring");
            }
        }
    }
}
