//! pulse-node: entry point for one storage node.
//!
//! Loads config, opens the store, starts gossip and the two TCP
//! listeners, and wires the ingest router and query coordinator. The
//! message-bus adapter and the public HTTP query transport are external
//! components that attach to the `IngestRouter` and `QueryService`
//! seams.

use pulse_cluster::{Gossip, GossipConfig, HashRing};
use pulse_common::{unix_millis, NodeDescriptor, NodeStatus};
use pulse_config::Mode;
use pulse_ingest::IngestRouter;
use pulse_net::{serve_gossip, serve_peer, TcpGossipClient, TcpPeerClient};
use pulse_query::{QueryConfig, QueryService};
use pulse_storage::{flush::spawn_flush_task, NodeStore, StoreConfig};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pulse_metrics::init_tracing();

    // First CLI arg is the YAML config path.
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    let config =
        pulse_config::load_from_file(std::path::Path::new(&config_path)).unwrap_or_else(|e| {
            tracing::warn!(
                "failed to load config from {}: {}, using defaults",
                config_path,
                e
            );
            pulse_config::load_from_str("node_id: \"node-1\"\n")
                .expect("hardcoded default config must parse")
        });

    let node_id = config.node_id.clone();
    tracing::info!(
        node_id = %node_id,
        mode = ?config.mode,
        gossip = %config.gossip_addr(),
        query = %config.query_addr(),
        "starting pulse node"
    );

    // Storage: reload the data file, then keep the periodic flusher
    // running for low-rate series.
    let store = Arc::new(NodeStore::open(
        &node_id,
        &config.storage.data_dir,
        StoreConfig {
            batch_size: config.storage.batch_size,
            flush_interval: Duration::from_secs(config.storage.flush_interval_secs),
            strict_end_bound: config.storage.strict_end_bound,
        },
    )?);
    spawn_flush_task(store.clone());

    // Membership: the ring starts with ourselves; gossip grows it.
    let ring = Arc::new(RwLock::new(HashRing::new(config.cluster.virtual_nodes)));
    ring.write().await.add_node(&node_id);

    let local = NodeDescriptor {
        id: node_id.clone(),
        gossip_addr: config.gossip_addr(),
        query_addr: config.query_addr(),
        bus_addr: config.bus_url.clone(),
        last_heartbeat: unix_millis(),
        status: NodeStatus::Active,
    };
    let gossip = Arc::new(Gossip::new(
        local,
        config.cluster.replication_factor,
        ring.clone(),
        Arc::new(TcpGossipClient::new()),
        GossipConfig {
            interval: Duration::from_millis(config.cluster.gossip_interval_ms),
            fanout: config.cluster.fanout,
            ring_sync_interval: Duration::from_millis(config.cluster.ring_sync_interval_ms),
        },
    ));
    gossip.spawn_tasks();

    // Query coordinator, also serving peer partial-aggregate requests.
    let query_service = Arc::new(QueryService::new(
        &node_id,
        store.clone(),
        ring.clone(),
        gossip.view(),
        Arc::new(TcpPeerClient::new()),
        QueryConfig {
            replication_factor: config.cluster.replication_factor,
            peer_timeout: Duration::from_millis(config.cluster.peer_timeout_ms),
        },
    ));

    // Listeners.
    let gossip_listener = TcpListener::bind(config.gossip_addr()).await?;
    {
        let gossip = gossip.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_gossip(gossip_listener, gossip).await {
                tracing::error!("gossip listener failed: {e}");
            }
        });
    }

    let peer_listener = TcpListener::bind(config.query_addr()).await?;
    {
        let service = query_service.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_peer(peer_listener, service).await {
                tracing::error!("peer query listener failed: {e}");
            }
        });
    }

    // Ingest routing; the bus adapter subscribes to `bus_url` and feeds
    // payloads into this router for the lifetime of the node.
    let _ingest_router = if matches!(config.mode, Mode::IngestOnly | Mode::Both) {
        tracing::info!(node_id = %node_id, bus = %config.bus_url, "ingest router ready");
        Some(Arc::new(IngestRouter::new(
            &node_id,
            store.clone(),
            ring.clone(),
            config.cluster.replication_factor,
        )))
    } else {
        tracing::info!(node_id = %node_id, "query-only node, ingest routing disabled");
        None
    };

    // Metrics endpoint.
    if let Some(metrics_port) = config.metrics_port {
        let metrics_addr: std::net::SocketAddr = format!("{}:{}", config.host, metrics_port)
            .parse()
            .expect("valid metrics address");
        tokio::spawn(async move {
            if let Err(e) = pulse_metrics::serve_metrics(metrics_addr).await {
                tracing::warn!("metrics server failed: {e}");
            }
        });
    }

    // Bootstrap from seeds once the listeners are up.
    if config.seeds.is_empty() {
        tracing::info!(node_id = %node_id, "no seeds configured, running standalone");
    } else {
        let gossip = gossip.clone();
        let seeds = config.seeds.clone();
        tokio::spawn(async move {
            tracing::info!("bootstrapping from {} seed(s)", seeds.len());
            gossip.bootstrap(&seeds).await;
        });
    }

    // Run until Ctrl+C, then drain the pending batch.
    tokio::signal::ctrl_c().await?;
    tracing::info!(node_id = %node_id, "shutting down");
    store.close().await;

    Ok(())
}
