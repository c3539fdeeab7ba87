//! Storage engine for pulse: per-series sorted indexes in memory,
//! backed by one compressed columnar file per node.
//!
//! The write path batches primary records and rewrites the file whole on
//! every flush, keeping it sorted and maximally compressible at the cost
//! of write amplification. Replicas live in memory only.

pub mod columnar;
pub mod flush;
pub mod series;
pub mod store;

pub use columnar::{ColumnarError, ColumnarFile};
pub use series::SeriesIndex;
pub use store::{NodeStore, StoreConfig, StoreError};
