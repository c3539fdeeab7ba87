//! Gossip membership: periodic view dissemination, failure detection,
//! and ring synchronization.
//!
//! Three periodic tasks run per node. The sender pushes the local view
//! to a few random ACTIVE peers; the failure detector ages heartbeats
//! into SUSPECT and DOWN; the ring-sync sweep reconciles the hash ring
//! with the view, which is the only way the ring changes after startup.

use crate::ring::HashRing;
use crate::transport::GossipTransport;
use crate::view::{ClusterView, GossipMessage};
use pulse_common::{unix_millis, NodeDescriptor, NodeStatus};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};

/// Timing knobs for the gossip tasks.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Interval between outbound dissemination rounds.
    pub interval: Duration,
    /// ACTIVE peers contacted per round.
    pub fanout: usize,
    /// Interval of the ring reconciliation sweep.
    pub ring_sync_interval: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            fanout: 3,
            ring_sync_interval: Duration::from_secs(3),
        }
    }
}

/// The gossip protocol driver for one node.
pub struct Gossip<T: GossipTransport> {
    local_id: String,
    view: Arc<RwLock<ClusterView>>,
    ring: Arc<RwLock<HashRing>>,
    transport: Arc<T>,
    config: GossipConfig,
}

impl<T: GossipTransport> std::fmt::Debug for Gossip<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gossip")
            .field("local_id", &self.local_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: GossipTransport> Gossip<T> {
    /// Create the driver with the local node already in the view. The
    /// caller seeds the local node into the ring; afterwards the ring
    /// only changes through [`sync_ring`](Self::sync_ring).
    pub fn new(
        mut local: NodeDescriptor,
        replication_factor: usize,
        ring: Arc<RwLock<HashRing>>,
        transport: Arc<T>,
        config: GossipConfig,
    ) -> Self {
        local.status = NodeStatus::Active;
        local.last_heartbeat = unix_millis();

        let local_id = local.id.clone();
        let mut view = ClusterView::new(replication_factor);
        view.upsert(local);

        Self {
            local_id,
            view: Arc::new(RwLock::new(view)),
            ring,
            transport,
            config,
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn view(&self) -> Arc<RwLock<ClusterView>> {
        self.view.clone()
    }

    pub fn ring(&self) -> Arc<RwLock<HashRing>> {
        self.ring.clone()
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Merge a peer's view into ours.
    pub async fn handle_message(&self, message: GossipMessage) {
        pulse_metrics::metrics().gossip_received.inc();

        let discovered = {
            let mut view = self.view.write().await;
            view.merge(&message.state)
        };

        for node_id in discovered {
            tracing::info!(
                local = %self.local_id,
                from = %message.from,
                "discovered node {node_id} via gossip"
            );
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// One dissemination round: refresh our own heartbeat, bump the view
    /// version, and push the view at up to `fanout` random ACTIVE peers.
    pub async fn send_round(&self) {
        let (message, peers) = {
            let mut view = self.view.write().await;
            if let Some(me) = view.nodes.get_mut(&self.local_id) {
                me.last_heartbeat = unix_millis();
                me.status = NodeStatus::Active;
            }
            view.version += 1;

            let message = GossipMessage {
                state: view.clone(),
                from: self.local_id.clone(),
                version: view.version,
            };
            (message, view.active_peers(&self.local_id))
        };

        let targets = pick_random(peers, self.config.fanout);
        if targets.is_empty() {
            return;
        }
        pulse_metrics::metrics().gossip_rounds.inc();

        for node_id in targets {
            let addr = {
                let view = self.view.read().await;
                view.get(&node_id).map(|n| n.gossip_addr.clone())
            };
            let Some(addr) = addr else { continue };

            if let Err(e) = self.transport.send_view(&addr, &message).await {
                tracing::warn!(
                    local = %self.local_id,
                    peer = %node_id,
                    "gossip send failed: {e}"
                );
                self.mark_suspect(&node_id).await;
            }
        }
    }

    /// Eagerly mark an unreachable peer SUSPECT (ACTIVE peers only; a
    /// DOWN peer stays down until its own heartbeats return).
    async fn mark_suspect(&self, node_id: &str) {
        let mut view = self.view.write().await;
        if view.get(node_id).map(|n| n.status) == Some(NodeStatus::Active)
            && view.set_status(node_id, NodeStatus::Suspect)
        {
            pulse_metrics::metrics().nodes_suspected.inc();
            tracing::warn!(local = %self.local_id, "node {node_id} marked SUSPECT (unreachable)");
        }
    }

    // -----------------------------------------------------------------------
    // Failure detection
    // -----------------------------------------------------------------------

    /// Age peers by heartbeat: older than `2 * interval` becomes
    /// SUSPECT, older than `5 * interval` becomes DOWN.
    pub async fn detect_failures(&self) {
        let now = unix_millis();
        let suspect_after = 2 * self.config.interval.as_millis() as u64;
        let down_after = 5 * self.config.interval.as_millis() as u64;

        let mut view = self.view.write().await;
        for node in view.nodes.values_mut() {
            if node.id == self.local_id {
                continue;
            }
            let silent_for = now.saturating_sub(node.last_heartbeat);

            if silent_for > down_after {
                if node.status != NodeStatus::Down {
                    tracing::warn!(
                        local = %self.local_id,
                        "node {} marked DOWN (no heartbeat for {silent_for} ms)",
                        node.id
                    );
                    node.status = NodeStatus::Down;
                    pulse_metrics::metrics().nodes_downed.inc();
                }
            } else if silent_for > suspect_after && node.status == NodeStatus::Active {
                tracing::warn!(
                    local = %self.local_id,
                    "node {} marked SUSPECT (no heartbeat for {silent_for} ms)",
                    node.id
                );
                node.status = NodeStatus::Suspect;
                pulse_metrics::metrics().nodes_suspected.inc();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Ring synchronization
    // -----------------------------------------------------------------------

    /// Reconcile the hash ring with the view: ACTIVE nodes join, DOWN
    /// nodes leave.
    pub async fn sync_ring(&self) {
        let statuses: Vec<(String, NodeStatus)> = {
            let view = self.view.read().await;
            view.nodes
                .values()
                .map(|n| (n.id.clone(), n.status))
                .collect()
        };

        let mut ring = self.ring.write().await;
        for (node_id, status) in statuses {
            match status {
                NodeStatus::Active if !ring.contains(&node_id) => {
                    tracing::info!(local = %self.local_id, "adding node {node_id} to hash ring");
                    ring.add_node(&node_id);
                }
                NodeStatus::Down if ring.contains(&node_id) => {
                    tracing::info!(local = %self.local_id, "removing node {node_id} from hash ring");
                    ring.remove_node(&node_id);
                }
                _ => {}
            }
        }
        pulse_metrics::metrics().ring_size.set(ring.len() as i64);
    }

    // -----------------------------------------------------------------------
    // Bootstrap
    // -----------------------------------------------------------------------

    /// One-shot introduction: push a view containing only ourselves at
    /// each configured seed. The seeds' regular gossip cycles fill in
    /// the rest.
    pub async fn bootstrap(&self, seeds: &[String]) {
        let message = {
            let view = self.view.read().await;
            let mut state = ClusterView::new(view.replication_factor);
            if let Some(me) = view.get(&self.local_id) {
                state.upsert(me.clone());
            }
            state.version = view.version;
            GossipMessage {
                version: state.version,
                from: self.local_id.clone(),
                state,
            }
        };

        for seed in seeds.iter().filter(|s| !s.is_empty()) {
            match self.transport.send_view(seed, &message).await {
                Ok(()) => tracing::info!(local = %self.local_id, "introduced to seed {seed}"),
                Err(e) => {
                    tracing::warn!(local = %self.local_id, "seed {seed} unreachable: {e}")
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Task spawning
    // -----------------------------------------------------------------------

    /// Spawn the three periodic tasks: sender, failure detector, ring
    /// sync.
    pub fn spawn_tasks(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let sender = {
            let gossip = self.clone();
            tokio::spawn(async move {
                let mut tick = interval(gossip.config.interval);
                loop {
                    tick.tick().await;
                    gossip.send_round().await;
                }
            })
        };

        let detector = {
            let gossip = self.clone();
            tokio::spawn(async move {
                let mut tick = interval(gossip.config.interval);
                loop {
                    tick.tick().await;
                    gossip.detect_failures().await;
                }
            })
        };

        let ring_sync = {
            let gossip = self.clone();
            tokio::spawn(async move {
                let mut tick = interval(gossip.config.ring_sync_interval);
                loop {
                    tick.tick().await;
                    gossip.sync_ring().await;
                }
            })
        };

        vec![sender, detector, ring_sync]
    }
}

/// Up to `count` ids drawn uniformly without replacement.
fn pick_random(mut ids: Vec<String>, count: usize) -> Vec<String> {
    if ids.len() <= count {
        return ids;
    }
    let mut rng = rand::thread_rng();
    ids.shuffle(&mut rng);
    ids.truncate(count);
    ids
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::GossipError;
    use std::collections::HashSet;
    use tokio::sync::Mutex;

    fn descriptor(id: &str, heartbeat: u64, status: NodeStatus) -> NodeDescriptor {
        NodeDescriptor {
            id: id.to_string(),
            gossip_addr: format!("gossip-{id}"),
            query_addr: format!("query-{id}"),
            bus_addr: "tcp://localhost:1883".to_string(),
            last_heartbeat: heartbeat,
            status,
        }
    }

    /// Records every send; optionally fails for chosen addresses.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, GossipMessage)>>,
        fail_addrs: HashSet<String>,
    }

    impl RecordingTransport {
        fn failing(addrs: &[&str]) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_addrs: addrs.iter().map(|s| s.to_string()).collect(),
            }
        }

        async fn sent(&self) -> Vec<(String, GossipMessage)> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait::async_trait]
    impl GossipTransport for RecordingTransport {
        async fn send_view(
            &self,
            addr: &str,
            message: &GossipMessage,
        ) -> Result<(), GossipError> {
            if self.fail_addrs.contains(addr) {
                return Err(GossipError::SendFailed {
                    addr: addr.to_string(),
                    reason: "simulated failure".into(),
                });
            }
            self.sent
                .lock()
                .await
                .push((addr.to_string(), message.clone()));
            Ok(())
        }
    }

    fn gossip_with(transport: Arc<RecordingTransport>) -> Arc<Gossip<RecordingTransport>> {
        let ring = Arc::new(RwLock::new(HashRing::default()));
        Arc::new(Gossip::new(
            descriptor("local", 0, NodeStatus::Active),
            2,
            ring,
            transport,
            GossipConfig::default(),
        ))
    }

    async fn insert_peers(gossip: &Gossip<RecordingTransport>, peers: &[NodeDescriptor]) {
        let mut view = gossip.view.write().await;
        for peer in peers {
            view.upsert(peer.clone());
        }
    }

    #[tokio::test]
    async fn test_send_round_reaches_active_peers() {
        let transport = Arc::new(RecordingTransport::default());
        let gossip = gossip_with(transport.clone());
        insert_peers(
            &gossip,
            &[
                descriptor("a", unix_millis(), NodeStatus::Active),
                descriptor("b", unix_millis(), NodeStatus::Active),
                descriptor("down", unix_millis(), NodeStatus::Down),
            ],
        )
        .await;

        gossip.send_round().await;

        let sent = transport.sent().await;
        let addrs: HashSet<String> = sent.iter().map(|(a, _)| a.clone()).collect();
        assert!(addrs.contains("gossip-a"));
        assert!(addrs.contains("gossip-b"));
        assert!(
            !addrs.contains("gossip-down"),
            "down peers must not be gossiped to"
        );

        // Every message carries the bumped version and our heartbeat.
        for (_, msg) in &sent {
            assert_eq!(msg.from, "local");
            assert!(msg.version >= 1);
            assert!(msg.state.nodes.contains_key("local"));
        }
    }

    #[tokio::test]
    async fn test_send_round_respects_fanout() {
        let transport = Arc::new(RecordingTransport::default());
        let gossip = gossip_with(transport.clone());
        let peers: Vec<NodeDescriptor> = (0..10)
            .map(|i| descriptor(&format!("p{i}"), unix_millis(), NodeStatus::Active))
            .collect();
        insert_peers(&gossip, &peers).await;

        gossip.send_round().await;

        assert_eq!(transport.sent().await.len(), 3, "fanout defaults to 3");
    }

    #[tokio::test]
    async fn test_send_failure_marks_suspect() {
        let transport = Arc::new(RecordingTransport::failing(&["gossip-a"]));
        let gossip = gossip_with(transport.clone());
        insert_peers(
            &gossip,
            &[descriptor("a", unix_millis(), NodeStatus::Active)],
        )
        .await;

        gossip.send_round().await;

        let view = gossip.view.read().await;
        assert_eq!(view.get("a").unwrap().status, NodeStatus::Suspect);
    }

    #[tokio::test]
    async fn test_handle_message_merges_and_discovers() {
        let transport = Arc::new(RecordingTransport::default());
        let gossip = gossip_with(transport);

        let mut remote_state = ClusterView::new(2);
        remote_state.upsert(descriptor("newcomer", unix_millis(), NodeStatus::Active));
        remote_state.version = 9;

        gossip
            .handle_message(GossipMessage {
                state: remote_state,
                from: "newcomer".into(),
                version: 9,
            })
            .await;

        let view = gossip.view.read().await;
        assert!(view.get("newcomer").is_some());
        assert!(view.version >= 9);
    }

    #[tokio::test]
    async fn test_detect_failures_transitions() {
        let transport = Arc::new(RecordingTransport::default());
        let gossip = gossip_with(transport);

        let now = unix_millis();
        let interval_ms = GossipConfig::default().interval.as_millis() as u64;
        insert_peers(
            &gossip,
            &[
                descriptor("fresh", now, NodeStatus::Active),
                descriptor("stale", now - 3 * interval_ms, NodeStatus::Active),
                descriptor("gone", now - 11 * interval_ms, NodeStatus::Active),
            ],
        )
        .await;

        gossip.detect_failures().await;

        let view = gossip.view.read().await;
        assert_eq!(view.get("fresh").unwrap().status, NodeStatus::Active);
        assert_eq!(view.get("stale").unwrap().status, NodeStatus::Suspect);
        assert_eq!(view.get("gone").unwrap().status, NodeStatus::Down);
    }

    #[tokio::test]
    async fn test_detect_failures_skips_local() {
        let transport = Arc::new(RecordingTransport::default());
        let gossip = gossip_with(transport);

        {
            let mut view = gossip.view.write().await;
            view.nodes.get_mut("local").unwrap().last_heartbeat = 0;
        }
        gossip.detect_failures().await;

        let view = gossip.view.read().await;
        assert_eq!(view.get("local").unwrap().status, NodeStatus::Active);
    }

    #[tokio::test]
    async fn test_sync_ring_adds_active_removes_down() {
        let transport = Arc::new(RecordingTransport::default());
        let gossip = gossip_with(transport);
        insert_peers(
            &gossip,
            &[
                descriptor("a", unix_millis(), NodeStatus::Active),
                descriptor("b", unix_millis(), NodeStatus::Down),
            ],
        )
        .await;
        {
            let mut ring = gossip.ring.write().await;
            ring.add_node("b");
        }

        gossip.sync_ring().await;

        let ring = gossip.ring.read().await;
        assert!(ring.contains("local"), "active local node joins the ring");
        assert!(ring.contains("a"));
        assert!(!ring.contains("b"), "down node leaves the ring");
    }

    #[tokio::test]
    async fn test_suspect_stays_in_ring() {
        let transport = Arc::new(RecordingTransport::default());
        let gossip = gossip_with(transport);
        insert_peers(
            &gossip,
            &[descriptor("a", unix_millis(), NodeStatus::Active)],
        )
        .await;

        gossip.sync_ring().await;
        {
            let mut view = gossip.view.write().await;
            view.set_status("a", NodeStatus::Suspect);
        }
        gossip.sync_ring().await;

        let ring = gossip.ring.read().await;
        assert!(ring.contains("a"), "suspect nodes keep their ring slots");
    }

    #[tokio::test]
    async fn test_bootstrap_sends_self_only_view() {
        let transport = Arc::new(RecordingTransport::default());
        let gossip = gossip_with(transport.clone());
        insert_peers(
            &gossip,
            &[descriptor("other", unix_millis(), NodeStatus::Active)],
        )
        .await;

        gossip
            .bootstrap(&["seed-1:9000".to_string(), String::new(), "seed-2:9000".to_string()])
            .await;

        let sent = transport.sent().await;
        assert_eq!(sent.len(), 2, "empty seed entries are skipped");
        for (_, msg) in sent {
            assert_eq!(msg.state.nodes.len(), 1, "bootstrap carries only ourselves");
            assert!(msg.state.nodes.contains_key("local"));
        }
    }

    #[tokio::test]
    async fn test_two_nodes_converge() {
        // Wire two drivers through in-process delivery and run a round
        // in each direction.
        let t1 = Arc::new(RecordingTransport::default());
        let t2 = Arc::new(RecordingTransport::default());
        let g1 = gossip_with(t1.clone());
        let ring2 = Arc::new(RwLock::new(HashRing::default()));
        let g2 = Arc::new(Gossip::new(
            descriptor("peer", 0, NodeStatus::Active),
            2,
            ring2,
            t2,
            GossipConfig::default(),
        ));

        // g1 learns about g2 as if a seed introduction arrived.
        let mut intro = ClusterView::new(2);
        intro.upsert(descriptor("peer", unix_millis(), NodeStatus::Active));
        g1.handle_message(GossipMessage {
            state: intro,
            from: "peer".into(),
            version: 1,
        })
        .await;

        // g1 gossips; deliver its message to g2 by hand.
        g1.send_round().await;
        let sent = t1.sent().await;
        assert_eq!(sent.len(), 1);
        g2.handle_message(sent[0].1.clone()).await;

        let view2 = g2.view.read().await;
        assert!(view2.get("local").is_some(), "peer learned about local");
        assert!(view2.get("peer").is_some());
    }
}
