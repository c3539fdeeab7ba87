//! Metrics and tracing setup for pulse nodes.
//!
//! Provides a global [`NodeMetrics`] singleton backed by the
//! `prometheus` crate, plus a lightweight HTTP server for Prometheus
//! scraping.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::net::SocketAddr;
use std::sync::OnceLock;

// ────────────────────────── Tracing ──────────────────────────

/// Initialize the tracing subscriber with env-filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

// ────────────────────────── Prometheus metrics ──────────────────────────

/// Global metrics instance.
static METRICS: OnceLock<NodeMetrics> = OnceLock::new();

/// Retrieve (or lazily create) the global metrics singleton.
pub fn metrics() -> &'static NodeMetrics {
    METRICS.get_or_init(NodeMetrics::new)
}

/// All Prometheus metrics for a pulse node.
pub struct NodeMetrics {
    pub registry: Registry,

    // ── Ingest ──
    pub samples_ingested: IntCounterVec,
    pub samples_dropped: IntCounter,
    pub samples_rejected: IntCounter,

    // ── Query ──
    pub queries: IntCounterVec,
    pub query_latency_secs: HistogramVec,
    pub deletes: IntCounter,

    // ── Peer RPC ──
    pub peer_requests_sent: IntCounterVec,
    pub peer_requests_received: IntCounterVec,
    pub peer_failures: IntCounter,

    // ── Gossip & membership ──
    pub gossip_rounds: IntCounter,
    pub gossip_received: IntCounter,
    pub nodes_suspected: IntCounter,
    pub nodes_downed: IntCounter,
    pub ring_size: IntGauge,
}

// Manual Debug impl because prometheus types don't derive Debug.
impl std::fmt::Debug for NodeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeMetrics").finish_non_exhaustive()
    }
}

/// Default histogram buckets (seconds) for query latency.
const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

impl NodeMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let samples_ingested = IntCounterVec::new(
            Opts::new("pulse_samples_ingested_total", "Samples stored, by role"),
            &["role"],
        )
        .expect("samples_ingested counter vec");
        let samples_dropped = IntCounter::with_opts(Opts::new(
            "pulse_samples_dropped_total",
            "Samples dropped because this node is not an owner",
        ))
        .expect("samples_dropped counter");
        let samples_rejected = IntCounter::with_opts(Opts::new(
            "pulse_samples_rejected_total",
            "Samples rejected as malformed",
        ))
        .expect("samples_rejected counter");

        let queries = IntCounterVec::new(
            Opts::new("pulse_queries_total", "Aggregation queries, by operation"),
            &["operation"],
        )
        .expect("queries counter vec");
        let query_latency_secs = HistogramVec::new(
            HistogramOpts::new("pulse_query_latency_seconds", "Query latency in seconds")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["operation"],
        )
        .expect("query_latency_secs histogram");
        let deletes = IntCounter::with_opts(Opts::new(
            "pulse_deletes_total",
            "Series delete requests handled",
        ))
        .expect("deletes counter");

        let peer_requests_sent = IntCounterVec::new(
            Opts::new("pulse_peer_requests_sent_total", "Outbound peer RPCs, by kind"),
            &["kind"],
        )
        .expect("peer_requests_sent counter vec");
        let peer_requests_received = IntCounterVec::new(
            Opts::new(
                "pulse_peer_requests_received_total",
                "Inbound peer RPCs, by kind",
            ),
            &["kind"],
        )
        .expect("peer_requests_received counter vec");
        let peer_failures = IntCounter::with_opts(Opts::new(
            "pulse_peer_failures_total",
            "Peer RPCs that failed or timed out",
        ))
        .expect("peer_failures counter");

        let gossip_rounds = IntCounter::with_opts(Opts::new(
            "pulse_gossip_rounds_total",
            "Outbound gossip dissemination rounds",
        ))
        .expect("gossip_rounds counter");
        let gossip_received = IntCounter::with_opts(Opts::new(
            "pulse_gossip_received_total",
            "Inbound gossip messages merged",
        ))
        .expect("gossip_received counter");
        let nodes_suspected = IntCounter::with_opts(Opts::new(
            "pulse_nodes_suspected_total",
            "Peers transitioned to SUSPECT",
        ))
        .expect("nodes_suspected counter");
        let nodes_downed = IntCounter::with_opts(Opts::new(
            "pulse_nodes_downed_total",
            "Peers transitioned to DOWN",
        ))
        .expect("nodes_downed counter");
        let ring_size = IntGauge::with_opts(Opts::new(
            "pulse_ring_nodes",
            "Physical nodes currently on the hash ring",
        ))
        .expect("ring_size gauge");

        for collector in [
            Box::new(samples_ingested.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(samples_dropped.clone()),
            Box::new(samples_rejected.clone()),
            Box::new(queries.clone()),
            Box::new(query_latency_secs.clone()),
            Box::new(deletes.clone()),
            Box::new(peer_requests_sent.clone()),
            Box::new(peer_requests_received.clone()),
            Box::new(peer_failures.clone()),
            Box::new(gossip_rounds.clone()),
            Box::new(gossip_received.clone()),
            Box::new(nodes_suspected.clone()),
            Box::new(nodes_downed.clone()),
            Box::new(ring_size.clone()),
        ] {
            registry.register(collector).expect("register metric");
        }

        Self {
            registry,
            samples_ingested,
            samples_dropped,
            samples_rejected,
            queries,
            query_latency_secs,
            deletes,
            peer_requests_sent,
            peer_requests_received,
            peer_failures,
            gossip_rounds,
            gossip_received,
            nodes_suspected,
            nodes_downed,
            ring_size,
        }
    }
}

/// Encode all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let m = metrics();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&m.registry.gather(), &mut buf)
        .expect("prometheus text encoding");
    String::from_utf8(buf).expect("prometheus output is valid UTF-8")
}

/// Helper: start a query latency timer. Records elapsed time on drop.
pub fn start_query_timer(operation: &str) -> prometheus::HistogramTimer {
    metrics()
        .query_latency_secs
        .with_label_values(&[operation])
        .start_timer()
}

// ────────────────────────── Metrics HTTP server ──────────────────────────

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

async fn metrics_handler(
    _req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let body = encode_metrics();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .expect("valid HTTP response"))
}

/// Serve Prometheus metrics on the given address (`GET /metrics`).
///
/// This spawns a lightweight HTTP/1.1 server. Call from a `tokio::spawn`.
pub async fn serve_metrics(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on http://{}/metrics", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::debug!("metrics connection error: {}", e);
            }
        });
    }
}

// ────────────────────────── Tests ──────────────────────────
