//! The distributed query coordinator.
//!
//! Aggregates consult the primary owner only, walking the replica list
//! in ring order when the primary cannot answer; replicated data would
//! otherwise be double-counted. The raw-samples diagnostics path does
//! the opposite on purpose: it concatenates every owner's values,
//! duplicates included.

use crate::api::{
    DeleteRequest, DeleteResponse, Operation, QueryRequest, QueryResult, SamplesResponse,
};
use crate::peer_client::{PeerClient, PeerError};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use pulse_cluster::{ClusterView, HashRing};
use pulse_common::{Aggregate, NodeDescriptor, SeriesKey};
use pulse_storage::NodeStore;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::time::{timeout, Duration};

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("missing or empty field: {0}")]
    MissingField(&'static str),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("all owning peers failed")]
    AllPeersFailed,
    #[error("storage error: {0}")]
    Storage(#[from] pulse_storage::StoreError),
}

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Owners per key, shared with the ingest router.
    pub replication_factor: usize,
    /// Deadline for each remote partial request.
    pub peer_timeout: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            replication_factor: 2,
            peer_timeout: Duration::from_secs(5),
        }
    }
}

/// Executes queries against the local store and the owning peers.
///
/// Generic over `P: PeerClient` for testability; the real deployment
/// uses the TCP client from `pulse-net`.
pub struct QueryService<P: PeerClient> {
    node_id: String,
    store: Arc<NodeStore>,
    ring: Arc<RwLock<HashRing>>,
    view: Arc<RwLock<ClusterView>>,
    peers: Arc<P>,
    config: QueryConfig,
}

impl<P: PeerClient> std::fmt::Debug for QueryService<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService")
            .field("node_id", &self.node_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P: PeerClient> QueryService<P> {
    pub fn new(
        node_id: &str,
        store: Arc<NodeStore>,
        ring: Arc<RwLock<HashRing>>,
        view: Arc<RwLock<ClusterView>>,
        peers: Arc<P>,
        config: QueryConfig,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            store,
            ring,
            view,
            peers,
            config,
        }
    }

    // -----------------------------------------------------------------------
    // Aggregation queries
    // -----------------------------------------------------------------------

    /// Execute an aggregation query end to end.
    pub async fn execute(&self, request: &QueryRequest) -> Result<QueryResult, QueryError> {
        let started = Instant::now();
        let key = validate_series(&request.device_id, &request.metric_name)?;
        let operation = Operation::parse(&request.operation)
            .ok_or_else(|| QueryError::UnsupportedOperation(request.operation.clone()))?;

        pulse_metrics::metrics()
            .queries
            .with_label_values(&[operation.as_str()])
            .inc();
        let _timer = pulse_metrics::start_query_timer(operation.as_str());

        let (stats, complete) = match self.distributed_aggregate(&key, request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    node_id = %self.node_id,
                    "distributed query failed ({e}), falling back to local store"
                );
                let local = self
                    .store
                    .query_aggregated(&key, request.start_time, request.end_time)
                    .await;
                (local, false)
            }
        };

        let (result, count) = finalize(operation, &stats);
        let out = QueryResult {
            device_id: request.device_id.clone(),
            metric_name: request.metric_name.clone(),
            operation: request.operation.clone(),
            result,
            count,
            duration_ns: started.elapsed().as_nanos() as i64,
            complete,
        };
        tracing::debug!(node_id = %self.node_id, "query answered: {out:?}");
        Ok(out)
    }

    /// Resolve the owner list and fetch the partial aggregate from the
    /// primary, falling back through replicas in ring order. Returns the
    /// partial plus whether every attempt before the winner succeeded.
    async fn distributed_aggregate(
        &self,
        key: &SeriesKey,
        request: &QueryRequest,
    ) -> Result<(Aggregate, bool), QueryError> {
        let owners = {
            let ring = self.ring.read().await;
            ring.owners(&key.routing_key(), self.config.replication_factor)
        };

        if owners.is_empty() {
            tracing::warn!(
                node_id = %self.node_id,
                "no owners known for {key}, serving from local store"
            );
            let local = self
                .store
                .query_aggregated(key, request.start_time, request.end_time)
                .await;
            return Ok((local, true));
        }

        let mut failures = 0usize;
        for owner in &owners {
            if *owner == self.node_id {
                let local = self
                    .store
                    .query_aggregated(key, request.start_time, request.end_time)
                    .await;
                return Ok((local, failures == 0));
            }

            match self.fetch_remote_aggregate(owner, request).await {
                Ok(partial) => return Ok((partial, failures == 0)),
                Err(e) => {
                    tracing::warn!(
                        node_id = %self.node_id,
                        owner = %owner,
                        "partial aggregate failed: {e}"
                    );
                    pulse_metrics::metrics().peer_failures.inc();
                    failures += 1;
                }
            }
        }

        Err(QueryError::AllPeersFailed)
    }

    async fn fetch_remote_aggregate(
        &self,
        owner: &str,
        request: &QueryRequest,
    ) -> Result<Aggregate, PeerError> {
        let target = self.descriptor_for(owner).await.ok_or_else(|| {
            PeerError::Unreachable(owner.to_string(), "not in cluster view".into())
        })?;

        pulse_metrics::metrics()
            .peer_requests_sent
            .with_label_values(&["aggregate"])
            .inc();

        match timeout(
            self.config.peer_timeout,
            self.peers.partial_aggregate(&target, request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PeerError::Timeout(owner.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Raw samples (diagnostics)
    // -----------------------------------------------------------------------

    /// Concatenate raw values across every owner, the local node
    /// included. Replicated samples appear once per holder by design.
    pub async fn samples(&self, request: &QueryRequest) -> Result<SamplesResponse, QueryError> {
        let key = validate_series(&request.device_id, &request.metric_name)?;

        let owners = {
            let ring = self.ring.read().await;
            ring.owners(&key.routing_key(), self.config.replication_factor)
        };

        let local = self
            .store
            .query(&key, request.start_time, request.end_time)
            .await;

        if owners.is_empty() {
            return Ok(SamplesResponse { samples: local });
        }

        let mut futs = FuturesUnordered::new();
        for owner in owners.iter().filter(|o| **o != self.node_id) {
            let owner = owner.clone();
            let request = request.clone();
            let peers = self.peers.clone();
            let deadline = self.config.peer_timeout;
            let target = self.descriptor_for(&owner).await;

            futs.push(tokio::spawn(async move {
                let Some(target) = target else {
                    return (owner, Err(PeerError::Unreachable(
                        "unknown".into(),
                        "not in cluster view".into(),
                    )));
                };
                pulse_metrics::metrics()
                    .peer_requests_sent
                    .with_label_values(&["samples"])
                    .inc();
                let result = match timeout(deadline, peers.raw_samples(&target, &request)).await {
                    Ok(result) => result,
                    Err(_) => Err(PeerError::Timeout(owner.clone())),
                };
                (owner, result)
            }));
        }

        let mut samples = local;
        let mut failures = 0usize;
        while let Some(joined) = futs.next().await {
            match joined {
                Ok((_, Ok(values))) => samples.extend(values),
                Ok((owner, Err(e))) => {
                    tracing::warn!(
                        node_id = %self.node_id,
                        owner = %owner,
                        "raw samples fetch failed: {e}"
                    );
                    pulse_metrics::metrics().peer_failures.inc();
                    failures += 1;
                }
                Err(e) => {
                    tracing::warn!(node_id = %self.node_id, "samples task panicked: {e}");
                    failures += 1;
                }
            }
        }

        if samples.is_empty() && failures > 0 {
            return Err(QueryError::AllPeersFailed);
        }
        Ok(SamplesResponse { samples })
    }

    // -----------------------------------------------------------------------
    // Peer-facing local handlers
    // -----------------------------------------------------------------------

    /// Serve a partial-aggregate request from the local store.
    pub async fn local_aggregate(&self, request: &QueryRequest) -> Result<Aggregate, QueryError> {
        let key = validate_series(&request.device_id, &request.metric_name)?;
        Ok(self
            .store
            .query_aggregated(&key, request.start_time, request.end_time)
            .await)
    }

    /// Serve a raw-samples request from the local store.
    pub async fn local_samples(&self, request: &QueryRequest) -> Result<Vec<f64>, QueryError> {
        let key = validate_series(&request.device_id, &request.metric_name)?;
        Ok(self
            .store
            .query(&key, request.start_time, request.end_time)
            .await)
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    /// Delete a series from the local store, memory and disk.
    pub async fn delete(&self, request: &DeleteRequest) -> Result<DeleteResponse, QueryError> {
        let key = validate_series(&request.device_id, &request.metric_name)?;
        self.store.delete(&key).await?;
        pulse_metrics::metrics().deletes.inc();

        tracing::info!(node_id = %self.node_id, "deleted all data for {key}");
        Ok(DeleteResponse {
            message: format!(
                "Successfully deleted all data for device={} metric={}",
                request.device_id, request.metric_name
            ),
        })
    }

    async fn descriptor_for(&self, node_id: &str) -> Option<NodeDescriptor> {
        let view = self.view.read().await;
        view.get(node_id).cloned()
    }
}

/// Shared request validation: both fields must be present.
fn validate_series(device_id: &str, metric_name: &str) -> Result<SeriesKey, QueryError> {
    if device_id.is_empty() {
        return Err(QueryError::MissingField("device_id"));
    }
    if metric_name.is_empty() {
        return Err(QueryError::MissingField("metric_name"));
    }
    SeriesKey::new(device_id, metric_name).map_err(|_| QueryError::MissingField("device_id"))
}

/// Apply the requested operation to a combined partial.
fn finalize(operation: Operation, stats: &Aggregate) -> (f64, i64) {
    if stats.count == 0 {
        return (0.0, 0);
    }
    let result = match operation {
        Operation::Avg => stats.sum / stats.count as f64,
        Operation::Sum => stats.sum,
        Operation::Min => stats.min,
        Operation::Max => stats.max,
    };
    (result, stats.count)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
