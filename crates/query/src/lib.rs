//! pulse-query: the distributed aggregation engine.
//!
//! Any node accepts a query, asks the ring for the owning peers, runs
//! the local part in-process, fetches partial aggregates from remote
//! owners, and combines them into one result.

pub mod api;
pub mod coordinator;
pub mod peer_client;

pub use api::{
    DeleteRequest, DeleteResponse, Operation, QueryRequest, QueryResult, SamplesResponse,
};
pub use coordinator::{QueryConfig, QueryError, QueryService};
pub use peer_client::{PeerClient, PeerError};
