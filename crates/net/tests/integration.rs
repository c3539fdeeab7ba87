//! End-to-end wire tests: two nodes talking over real TCP sockets.

use pulse_cluster::{ClusterView, Gossip, GossipConfig, HashRing};
use pulse_common::{unix_millis, NodeDescriptor, NodeStatus, Record, SeriesKey};
use pulse_net::{serve_gossip, serve_peer, TcpGossipClient, TcpPeerClient};
use pulse_query::{PeerClient, QueryConfig, QueryRequest, QueryService};
use pulse_storage::{NodeStore, StoreConfig};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

fn descriptor(id: &str, gossip_addr: &str, query_addr: &str) -> NodeDescriptor {
    NodeDescriptor {
        id: id.to_string(),
        gossip_addr: gossip_addr.to_string(),
        query_addr: query_addr.to_string(),
        bus_addr: "tcp://localhost:1883".to_string(),
        last_heartbeat: unix_millis(),
        status: NodeStatus::Active,
    }
}

struct TestNode {
    id: String,
    gossip: Arc<Gossip<TcpGossipClient>>,
    service: Arc<QueryService<TcpPeerClient>>,
    store: Arc<NodeStore>,
    gossip_addr: String,
    query_addr: String,
    _dir: TempDir,
}

/// Bind listeners on ephemeral ports and wire up one full node.
async fn start_node(id: &str, replication_factor: usize) -> TestNode {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(NodeStore::open(id, dir.path(), StoreConfig::default()).unwrap());

    let gossip_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let query_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let gossip_addr = gossip_listener.local_addr().unwrap().to_string();
    let query_addr = query_listener.local_addr().unwrap().to_string();

    let ring = Arc::new(RwLock::new(HashRing::default()));
    ring.write().await.add_node(id);

    let gossip = Arc::new(Gossip::new(
        descriptor(id, &gossip_addr, &query_addr),
        replication_factor,
        ring.clone(),
        Arc::new(TcpGossipClient::new()),
        GossipConfig {
            interval: Duration::from_millis(100),
            fanout: 3,
            ring_sync_interval: Duration::from_millis(150),
        },
    ));

    let service = Arc::new(QueryService::new(
        id,
        store.clone(),
        ring,
        gossip.view(),
        Arc::new(TcpPeerClient::new()),
        QueryConfig {
            replication_factor,
            peer_timeout: Duration::from_secs(2),
        },
    ));

    {
        let gossip = gossip.clone();
        tokio::spawn(async move {
            let _ = serve_gossip(gossip_listener, gossip).await;
        });
    }
    {
        let service = service.clone();
        tokio::spawn(async move {
            let _ = serve_peer(query_listener, service).await;
        });
    }

    TestNode {
        id: id.to_string(),
        gossip,
        service,
        store,
        gossip_addr,
        query_addr,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_gossip_bootstrap_over_tcp() {
    let node_a = start_node("node-a", 2).await;
    let node_b = start_node("node-b", 2).await;

    // B introduces itself to A; A's next round tells B about A.
    node_b.gossip.bootstrap(&[node_a.gossip_addr.clone()]).await;
    sleep(Duration::from_millis(100)).await;
    node_a.gossip.send_round().await;
    sleep(Duration::from_millis(100)).await;

    let view_a = node_a.gossip.view();
    let view_a = view_a.read().await;
    assert!(view_a.get(&node_b.id).is_some(), "A should know B");

    let view_b = node_b.gossip.view();
    let view_b = view_b.read().await;
    assert!(view_b.get(&node_a.id).is_some(), "B should know A");
}

#[tokio::test]
async fn test_ring_converges_after_gossip() {
    let node_a = start_node("node-a", 2).await;
    let node_b = start_node("node-b", 2).await;

    node_b.gossip.bootstrap(&[node_a.gossip_addr.clone()]).await;
    sleep(Duration::from_millis(100)).await;
    node_a.gossip.send_round().await;
    sleep(Duration::from_millis(100)).await;

    node_a.gossip.sync_ring().await;
    node_b.gossip.sync_ring().await;

    let ring_a = node_a.gossip.ring();
    let ring_a = ring_a.read().await;
    assert_eq!(ring_a.len(), 2, "A's ring should hold both nodes");

    let ring_b = node_b.gossip.ring();
    let ring_b = ring_b.read().await;
    assert_eq!(ring_b.len(), 2, "B's ring should hold both nodes");
}

#[tokio::test]
async fn test_partial_aggregate_over_tcp() {
    let node_a = start_node("node-a", 1).await;
    let node_b = start_node("node-b", 1).await;

    // A holds the data.
    let key = SeriesKey::new("sensor_1", "temperature").unwrap();
    for (ts, value) in [(100, 20.0), (101, 21.0), (102, 22.0)] {
        node_a
            .store
            .persist_primary(Record::new(&key, ts, value))
            .await
            .unwrap();
    }

    // B's ring maps every key to A, and B's view knows A's endpoints.
    {
        let ring = node_b.gossip.ring();
        let mut ring = ring.write().await;
        ring.remove_node("node-b");
        ring.add_node("node-a");
    }
    {
        let view = node_b.gossip.view();
        let mut view = view.write().await;
        view.upsert(descriptor("node-a", &node_a.gossip_addr, &node_a.query_addr));
    }

    let request = QueryRequest {
        device_id: "sensor_1".into(),
        metric_name: "temperature".into(),
        operation: "avg".into(),
        start_time: 0,
        end_time: 0,
    };
    let result = node_b.service.execute(&request).await.unwrap();

    assert_eq!(result.result, 21.0);
    assert_eq!(result.count, 3);
    assert!(result.complete);
}

#[tokio::test]
async fn test_raw_samples_over_tcp() {
    let node_a = start_node("node-a", 1).await;
    let node_b = start_node("node-b", 1).await;

    let key = SeriesKey::new("dev", "m").unwrap();
    node_a
        .store
        .persist_primary(Record::new(&key, 1, 4.5))
        .await
        .unwrap();

    {
        let ring = node_b.gossip.ring();
        let mut ring = ring.write().await;
        ring.remove_node("node-b");
        ring.add_node("node-a");
    }
    {
        let view = node_b.gossip.view();
        let mut view = view.write().await;
        view.upsert(descriptor("node-a", &node_a.gossip_addr, &node_a.query_addr));
    }

    let request = QueryRequest {
        device_id: "dev".into(),
        metric_name: "m".into(),
        operation: "avg".into(),
        start_time: 0,
        end_time: 0,
    };
    let response = node_b.service.samples(&request).await.unwrap();
    assert_eq!(response.samples, vec![4.5]);
}

#[tokio::test]
async fn test_peer_error_reply_for_bad_request() {
    let node_a = start_node("node-a", 1).await;

    // A request with an empty device id gets an error reply, which the
    // client surfaces as a remote failure.
    let client = TcpPeerClient::new();
    let target = descriptor("node-a", &node_a.gossip_addr, &node_a.query_addr);
    let bad_request = QueryRequest {
        device_id: String::new(),
        metric_name: "m".into(),
        operation: "avg".into(),
        start_time: 0,
        end_time: 0,
    };

    let result = client.partial_aggregate(&target, &bad_request).await;
    assert!(result.is_err(), "empty device_id must be rejected remotely");
}

#[tokio::test]
async fn test_unreachable_peer_times_out() {
    let client = TcpPeerClient::with_deadline(Duration::from_millis(200));
    // A port nobody listens on.
    let target = descriptor("ghost", "127.0.0.1:1", "127.0.0.1:1");
    let request = QueryRequest {
        device_id: "d".into(),
        metric_name: "m".into(),
        operation: "avg".into(),
        start_time: 0,
        end_time: 0,
    };

    let result = client.partial_aggregate(&target, &request).await;
    assert!(result.is_err());
}
