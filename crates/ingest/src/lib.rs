//! pulse-ingest: per-sample routing at the bus seam.
//!
//! Every node subscribed to the bus sees every sample. The router asks
//! the ring who owns the sample's routing key and stores it as primary,
//! stores it as replica, or drops it. The bus client itself is an
//! external adapter; it hands payload bytes (or parsed [`DataPoint`]s)
//! to [`IngestRouter::handle_payload`].

use pulse_cluster::HashRing;
use pulse_common::{DataPoint, Record, SeriesKey};
use pulse_storage::NodeStore;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("missing or empty field: {0}")]
    MissingField(&'static str),
    #[error("storage error: {0}")]
    Storage(#[from] pulse_storage::StoreError),
}

/// What the router decided to do with one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision {
    StoredPrimary,
    StoredReplica,
    Dropped,
}

/// Routes incoming samples to the local store based on ring ownership.
pub struct IngestRouter {
    node_id: String,
    store: Arc<NodeStore>,
    ring: Arc<RwLock<HashRing>>,
    replication_factor: usize,
}

impl std::fmt::Debug for IngestRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestRouter")
            .field("node_id", &self.node_id)
            .field("replication_factor", &self.replication_factor)
            .finish_non_exhaustive()
    }
}

impl IngestRouter {
    pub fn new(
        node_id: &str,
        store: Arc<NodeStore>,
        ring: Arc<RwLock<HashRing>>,
        replication_factor: usize,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            store,
            ring,
            replication_factor: replication_factor.max(1),
        }
    }

    /// Parse one bus message and route it.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<RoutingDecision, IngestError> {
        let point: DataPoint = serde_json::from_slice(payload).inspect_err(|_| {
            pulse_metrics::metrics().samples_rejected.inc();
        })?;
        self.handle_point(point).await
    }

    /// Route one parsed sample: primary, replica, or drop.
    pub async fn handle_point(&self, point: DataPoint) -> Result<RoutingDecision, IngestError> {
        let key = match SeriesKey::new(&point.device_id, &point.metric_name) {
            Ok(key) => key,
            Err(pulse_common::ModelError::EmptyField(field)) => {
                pulse_metrics::metrics().samples_rejected.inc();
                return Err(IngestError::MissingField(field));
            }
        };

        let owners = {
            let ring = self.ring.read().await;
            ring.owners(&key.routing_key(), self.replication_factor)
        };

        let record = Record::new(&key, point.timestamp, point.value);

        // Degenerate single-node case: with no known owners, keep the
        // sample locally rather than lose it.
        if owners.is_empty() {
            tracing::warn!(
                node_id = %self.node_id,
                "ring empty, persisting {key} locally as primary"
            );
            self.store.persist_primary(record).await?;
            pulse_metrics::metrics()
                .samples_ingested
                .with_label_values(&["primary"])
                .inc();
            return Ok(RoutingDecision::StoredPrimary);
        }

        if owners[0] == self.node_id {
            self.store.persist_primary(record).await?;
            pulse_metrics::metrics()
                .samples_ingested
                .with_label_values(&["primary"])
                .inc();
            tracing::debug!(
                node_id = %self.node_id,
                "PRIMARY stored {key} = {}",
                point.value
            );
            Ok(RoutingDecision::StoredPrimary)
        } else if owners[1..].iter().any(|id| id == &self.node_id) {
            self.store.persist_replica(record).await?;
            pulse_metrics::metrics()
                .samples_ingested
                .with_label_values(&["replica"])
                .inc();
            tracing::debug!(
                node_id = %self.node_id,
                primary = %owners[0],
                "REPLICA stored {key} = {}",
                point.value
            );
            Ok(RoutingDecision::StoredReplica)
        } else {
            pulse_metrics::metrics().samples_dropped.inc();
            Ok(RoutingDecision::Dropped)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
