//! Wire types for the query surface.
//!
//! These are the JSON bodies the outer HTTP transport exchanges with
//! clients, reused verbatim for peer-to-peer partial-aggregate and
//! raw-samples requests.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregation operations a query may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Avg,
    Sum,
    Min,
    Max,
}

impl Operation {
    /// Parse the wire spelling, rejecting anything else.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "avg" => Some(Self::Avg),
            "sum" => Some(Self::Sum),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An aggregation query. `0` on either bound means "open".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub metric_name: String,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
}

/// The single combined answer to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub device_id: String,
    pub metric_name: String,
    pub operation: String,
    pub result: f64,
    pub count: i64,
    pub duration_ns: i64,
    /// False when at least one owning peer failed to answer, so a zero
    /// result can be told apart from a partial outage.
    pub complete: bool,
}

/// Raw-samples reply for the diagnostics path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplesResponse {
    pub samples: Vec<f64>,
}

/// Series deletion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub metric_name: String,
}

/// Series deletion acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub message: String,
}
