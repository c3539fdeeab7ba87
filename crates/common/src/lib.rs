//! pulse-common: shared types for the pulse time-series store.
//!
//! Provides the sample/record data model, the series key, node
//! descriptors for the gossip cluster view, and the combinable
//! partial-aggregate type used by the distributed query path.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between device and metric in the in-memory series key.
pub const SERIES_KEY_SEPARATOR: char = '|';

/// Separator between device and metric in the ring routing key.
pub const ROUTING_KEY_SEPARATOR: char = ':';

// ---------------------------------------------------------------------------
// SeriesKey
// ---------------------------------------------------------------------------

/// Identifies one time series: a `(device_id, metric)` pair.
///
/// Empty device or metric is invalid; construction rejects it so that
/// every `SeriesKey` in the system names a real series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub device_id: String,
    pub metric: String,
}

impl SeriesKey {
    /// Create a series key, rejecting empty components.
    pub fn new(device_id: &str, metric: &str) -> Result<Self, ModelError> {
        if device_id.is_empty() {
            return Err(ModelError::EmptyField("device_id"));
        }
        if metric.is_empty() {
            return Err(ModelError::EmptyField("metric_name"));
        }
        Ok(Self {
            device_id: device_id.to_string(),
            metric: metric.to_string(),
        })
    }

    /// The in-memory map key, `device|metric`.
    pub fn storage_key(&self) -> String {
        format!("{}{}{}", self.device_id, SERIES_KEY_SEPARATOR, self.metric)
    }

    /// The ring routing key, `device:metric`.
    ///
    /// Distinct from [`storage_key`](Self::storage_key) so each metric of
    /// the same device can land on a different primary.
    pub fn routing_key(&self) -> String {
        format!("{}{}{}", self.device_id, ROUTING_KEY_SEPARATOR, self.metric)
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.metric)
    }
}

// ---------------------------------------------------------------------------
// Samples and records
// ---------------------------------------------------------------------------

/// Whether this node stores a sample as the ring-designated owner or as
/// a replica. Runtime-only: the role never reaches disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Replica,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Replica => write!(f, "replica"),
        }
    }
}

/// An immutable numeric sample inside one series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    pub value: f64,
    pub role: Role,
}

/// The durable form of a sample: what the columnar file stores.
///
/// Every record written to disk is effectively a primary; the role is
/// dropped at the persistence boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: i64,
    pub value: f64,
    pub device_id: String,
    pub metric_name: String,
}

impl Record {
    pub fn new(key: &SeriesKey, timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value,
            device_id: key.device_id.clone(),
            metric_name: key.metric.clone(),
        }
    }

    /// The series this record belongs to. Fails only for v1-era records
    /// whose string columns were absent on disk.
    pub fn series_key(&self) -> Result<SeriesKey, ModelError> {
        SeriesKey::new(&self.device_id, &self.metric_name)
    }
}

/// The bus ingest payload: one JSON message per sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub metric_name: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub value: f64,
}

// ---------------------------------------------------------------------------
// Partial aggregates
// ---------------------------------------------------------------------------

/// A combinable partial aggregate over a subset of one series.
///
/// `count == 0` means the observed interval was empty; `min`/`max` are
/// meaningless in that case and ignored when combining.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Aggregate {
    pub sum: f64,
    pub count: i64,
    pub min: f64,
    pub max: f64,
}

impl Aggregate {
    /// Aggregate of a single value.
    pub fn of(value: f64) -> Self {
        Self {
            sum: value,
            count: 1,
            min: value,
            max: value,
        }
    }

    /// Fold another value into this aggregate.
    pub fn observe(&mut self, value: f64) {
        if self.count == 0 {
            *self = Self::of(value);
            return;
        }
        self.sum += value;
        self.count += 1;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    /// Combine two partials. Associative and commutative, so owner
    /// replies may be merged in any order.
    pub fn combine(&self, other: &Aggregate) -> Aggregate {
        if self.count == 0 {
            return *other;
        }
        if other.count == 0 {
            return *self;
        }
        Aggregate {
            sum: self.sum + other.sum,
            count: self.count + other.count,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

// ---------------------------------------------------------------------------
// Cluster membership types
// ---------------------------------------------------------------------------

/// Liveness state of a peer in the cluster view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Suspect,
    Down,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Active => write!(f, "active"),
            NodeStatus::Suspect => write!(f, "suspect"),
            NodeStatus::Down => write!(f, "down"),
        }
    }
}

/// Descriptor for one node as carried in gossip messages.
///
/// Identity is `id`; two descriptors for the same id merge by
/// last-write-wins on `last_heartbeat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub id: String,
    /// Gossip TCP endpoint, `host:port`.
    pub gossip_addr: String,
    /// Peer query endpoint, `host:port`.
    pub query_addr: String,
    /// Message-bus endpoint this node subscribes to.
    pub bus_addr: String,
    /// Milliseconds since the Unix epoch of the last heartbeat.
    pub last_heartbeat: u64,
    pub status: NodeStatus,
}

impl NodeDescriptor {
    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    /// True if `other` carries fresher information for the same node.
    pub fn is_superseded_by(&self, other: &NodeDescriptor) -> bool {
        self.id == other.id && other.last_heartbeat > self.last_heartbeat
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("missing or empty field: {0}")]
    EmptyField(&'static str),
}

/// Milliseconds since the Unix epoch, for heartbeats.
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_key_rejects_empty() {
        assert!(SeriesKey::new("", "temperature").is_err());
        assert!(SeriesKey::new("sensor_1", "").is_err());
        assert!(SeriesKey::new("sensor_1", "temperature").is_ok());
    }

    #[test]
    fn test_series_key_formats() {
        let key = SeriesKey::new("sensor_1", "temperature").unwrap();
        assert_eq!(key.storage_key(), "sensor_1|temperature");
        assert_eq!(key.routing_key(), "sensor_1:temperature");
    }

    #[test]
    fn test_routing_key_separates_metrics() {
        let a = SeriesKey::new("dev", "temp").unwrap();
        let b = SeriesKey::new("dev", "humidity").unwrap();
        assert_ne!(a.routing_key(), b.routing_key());
    }

    #[test]
    fn test_aggregate_observe() {
        let mut agg = Aggregate::default();
        assert_eq!(agg.count, 0);

        agg.observe(20.0);
        agg.observe(22.0);
        agg.observe(21.0);

        assert_eq!(agg.count, 3);
        assert!((agg.sum - 63.0).abs() < 1e-12);
        assert_eq!(agg.min, 20.0);
        assert_eq!(agg.max, 22.0);
    }

    #[test]
    fn test_aggregate_combine_identity() {
        let a = Aggregate::of(5.0);
        let empty = Aggregate::default();
        assert_eq!(a.combine(&empty), a);
        assert_eq!(empty.combine(&a), a);
    }

    #[test]
    fn test_aggregate_combine_commutative_associative() {
        let parts = [
            Aggregate {
                sum: 10.0,
                count: 4,
                min: 1.0,
                max: 4.0,
            },
            Aggregate {
                sum: -3.0,
                count: 2,
                min: -5.0,
                max: 2.0,
            },
            Aggregate {
                sum: 7.5,
                count: 3,
                min: 2.0,
                max: 3.5,
            },
        ];

        let forward = parts[0].combine(&parts[1]).combine(&parts[2]);
        let reverse = parts[2].combine(&parts[1]).combine(&parts[0]);
        let nested = parts[0].combine(&parts[1].combine(&parts[2]));

        assert_eq!(forward, reverse);
        assert_eq!(forward, nested);
        assert_eq!(forward.count, 9);
        assert_eq!(forward.min, -5.0);
        assert_eq!(forward.max, 4.0);
    }

    #[test]
    fn test_data_point_parses_bus_payload() {
        let payload = r#"{ "device_id": "sensor_1", "metric_name": "temperature",
                           "timestamp": 1609459200, "value": 23.5 }"#;
        let point: DataPoint = serde_json::from_str(payload).unwrap();
        assert_eq!(point.device_id, "sensor_1");
        assert_eq!(point.metric_name, "temperature");
        assert_eq!(point.timestamp, 1609459200);
        assert!((point.value - 23.5).abs() < 1e-12);
    }

    #[test]
    fn test_data_point_missing_fields_default() {
        let point: DataPoint = serde_json::from_str(r#"{ "value": 1.0 }"#).unwrap();
        assert!(point.device_id.is_empty());
        assert!(point.metric_name.is_empty());
    }

    #[test]
    fn test_descriptor_supersession() {
        let older = NodeDescriptor {
            id: "node-a".into(),
            gossip_addr: "127.0.0.1:9000".into(),
            query_addr: "127.0.0.1:8080".into(),
            bus_addr: "tcp://localhost:1883".into(),
            last_heartbeat: 100,
            status: NodeStatus::Active,
        };
        let newer = NodeDescriptor {
            last_heartbeat: 200,
            status: NodeStatus::Suspect,
            ..older.clone()
        };

        assert!(older.is_superseded_by(&newer));
        assert!(!newer.is_superseded_by(&older));

        let other_node = NodeDescriptor {
            id: "node-b".into(),
            ..newer.clone()
        };
        assert!(!older.is_superseded_by(&other_node));
    }

    #[test]
    fn test_record_round_trips_series_key() {
        let key = SeriesKey::new("dev", "metric").unwrap();
        let record = Record::new(&key, 42, 1.5);
        assert_eq!(record.series_key().unwrap(), key);

        let v1_record = Record {
            timestamp: 1,
            value: 0.0,
            device_id: String::new(),
            metric_name: String::new(),
        };
        assert!(v1_record.series_key().is_err());
    }
}
