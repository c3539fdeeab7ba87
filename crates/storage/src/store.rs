//! Node store: orchestrates the in-memory series map, the pending
//! ingest batch, and the columnar file on disk.
//!
//! Writers take the state lock exclusively; queries take it shared.
//! Flushes snapshot the batch under the lock but release it across disk
//! I/O so readers never wait on a rewrite; a separate flush mutex keeps
//! concurrent rewrites from interleaving on the file.

use crate::columnar::{ColumnarError, ColumnarFile};
use crate::series::SeriesIndex;
use pulse_common::{Aggregate, Record, Role, SeriesKey};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("columnar file error: {0}")]
    Columnar(#[from] ColumnarError),
    #[error("invalid record: {0}")]
    InvalidRecord(#[from] pulse_common::ModelError),
}

/// Tunables for the node store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Drain the batch when it reaches this many records.
    pub batch_size: usize,
    /// The background flusher drains at this interval regardless of size.
    pub flush_interval: Duration,
    /// Treat `start=0, end>0` as `(-inf, end]` instead of the historical
    /// whole-series read.
    pub strict_end_bound: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval: Duration::from_secs(5),
            strict_end_bound: false,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    series: HashMap<String, SeriesIndex>,
    batch: Vec<Record>,
}

/// One node's storage: series map + pending batch + columnar file.
#[derive(Debug)]
pub struct NodeStore {
    node_id: String,
    file: ColumnarFile,
    config: StoreConfig,
    state: RwLock<StoreState>,
    /// Serializes read-merge-rewrite cycles on the data file.
    flush_lock: Mutex<()>,
}

impl NodeStore {
    /// Open the store for `node_id`, reloading any existing data file.
    ///
    /// A missing file is a fresh start; a corrupt file is logged and
    /// treated as empty.
    pub fn open(node_id: &str, data_dir: &Path, config: StoreConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        let file = ColumnarFile::new(data_dir.join(format!("{node_id}.parq")));

        let mut state = StoreState::default();
        if file.exists() {
            match file.read() {
                Ok(records) => {
                    load_records(&mut state.series, records);
                    tracing::info!(
                        node_id,
                        series = state.series.len(),
                        "reloaded data file {:?}",
                        file.path()
                    );
                }
                Err(e) => {
                    tracing::warn!(node_id, "failed to reload data file, starting empty: {e}");
                }
            }
        } else {
            tracing::info!(node_id, "no existing data file, starting fresh");
        }

        Ok(Self {
            node_id: node_id.to_string(),
            file,
            config,
            state: RwLock::new(state),
            flush_lock: Mutex::new(()),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Ingest
    // -----------------------------------------------------------------------

    /// Store a record this node owns as primary: it enters the series
    /// index and the flush batch. A full batch drains immediately.
    pub async fn persist_primary(&self, record: Record) -> Result<(), StoreError> {
        let key = record.series_key()?;

        let full_batch = {
            let mut state = self.state.write().await;
            state
                .series
                .entry(key.storage_key())
                .or_default()
                .insert(record.timestamp, record.value, Role::Primary);
            state.batch.push(record);

            if state.batch.len() >= self.config.batch_size {
                tracing::debug!(
                    node_id = %self.node_id,
                    records = state.batch.len(),
                    "batch full, draining"
                );
                Some(std::mem::take(&mut state.batch))
            } else {
                None
            }
        };

        if let Some(batch) = full_batch {
            self.flush_records(batch).await;
        }
        Ok(())
    }

    /// Store a record this node holds as a replica. Replicas stay in
    /// memory only; they never join the flush batch.
    pub async fn persist_replica(&self, record: Record) -> Result<(), StoreError> {
        let key = record.series_key()?;

        let mut state = self.state.write().await;
        state
            .series
            .entry(key.storage_key())
            .or_default()
            .insert(record.timestamp, record.value, Role::Replica);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Query
    // -----------------------------------------------------------------------

    /// Raw values in the matching range, for the distributed sampler
    /// path. Unknown series returns an empty vector.
    pub async fn query(&self, key: &SeriesKey, start: i64, end: i64) -> Vec<f64> {
        let state = self.state.read().await;
        match state.series.get(&key.storage_key()) {
            Some(index) => index
                .range(start, end, self.config.strict_end_bound)
                .iter()
                .map(|s| s.value)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Locally combined aggregate over the matching range.
    pub async fn query_aggregated(&self, key: &SeriesKey, start: i64, end: i64) -> Aggregate {
        let state = self.state.read().await;
        match state.series.get(&key.storage_key()) {
            Some(index) => index.aggregate(start, end, self.config.strict_end_bound),
            None => Aggregate::default(),
        }
    }

    /// Number of distinct series currently in memory.
    pub async fn series_count(&self) -> usize {
        self.state.read().await.series.len()
    }

    /// Records waiting for the next drain.
    pub async fn pending_len(&self) -> usize {
        self.state.read().await.batch.len()
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    /// Remove a series from memory, the pending batch, and the data
    /// file. Legacy records without device/metric columns cannot be
    /// matched and are left in place.
    pub async fn delete(&self, key: &SeriesKey) -> Result<(), StoreError> {
        {
            let mut state = self.state.write().await;
            state.series.remove(&key.storage_key());

            let before = state.batch.len();
            state
                .batch
                .retain(|r| r.device_id != key.device_id || r.metric_name != key.metric);
            let removed = before - state.batch.len();
            if removed > 0 {
                tracing::debug!(
                    node_id = %self.node_id,
                    removed,
                    "dropped pending batch records for deleted series {key}"
                );
            }
        }

        let _flush = self.flush_lock.lock().await;

        let existing = match self.file.read() {
            Ok(records) => records,
            Err(ColumnarError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                tracing::warn!(node_id = %self.node_id, "could not read data file for delete: {e}");
                return Ok(());
            }
        };

        let legacy = existing
            .iter()
            .filter(|r| r.device_id.is_empty() && r.metric_name.is_empty())
            .count();
        let filtered: Vec<Record> = existing
            .iter()
            .filter(|r| {
                (r.device_id.is_empty() && r.metric_name.is_empty())
                    || r.device_id != key.device_id
                    || r.metric_name != key.metric
            })
            .cloned()
            .collect();

        if legacy > 0 {
            tracing::warn!(
                node_id = %self.node_id,
                legacy,
                "data file holds records without device/metric columns; they cannot be deleted"
            );
        }

        if filtered.is_empty() {
            self.file.remove()?;
            tracing::info!(node_id = %self.node_id, "removed empty data file after delete");
        } else if filtered.len() != existing.len() {
            self.file.write(&filtered)?;
            tracing::info!(
                node_id = %self.node_id,
                kept = filtered.len(),
                removed = existing.len() - filtered.len(),
                "rewrote data file without series {key}"
            );
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Flush
    // -----------------------------------------------------------------------

    /// Snapshot and clear the pending batch, then merge it into the data
    /// file. The state lock is released while disk I/O runs.
    pub async fn drain(&self) {
        let batch = {
            let mut state = self.state.write().await;
            if state.batch.is_empty() {
                return;
            }
            std::mem::take(&mut state.batch)
        };
        self.flush_records(batch).await;
    }

    /// Rewrite the file as the sorted merge of its current contents and
    /// `batch`. Failures are logged; the in-memory image stays
    /// authoritative.
    async fn flush_records(&self, mut batch: Vec<Record>) {
        let _flush = self.flush_lock.lock().await;

        batch.sort_by_key(|r| r.timestamp);

        let mut all = match self.file.read() {
            Ok(existing) => existing,
            Err(ColumnarError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!(
                    node_id = %self.node_id,
                    "existing data unreadable, flushing batch alone: {e}"
                );
                Vec::new()
            }
        };
        all.extend(batch);
        all.sort_by_key(|r| r.timestamp);

        match self.file.write(&all) {
            Ok(()) => tracing::debug!(
                node_id = %self.node_id,
                records = all.len(),
                "flushed data file {:?}",
                self.file.path()
            ),
            Err(e) => tracing::warn!(node_id = %self.node_id, "flush failed: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // Reload / close
    // -----------------------------------------------------------------------

    /// Rebuild the series map from the data file. Everything reloaded is
    /// a primary; replica samples do not survive a restart.
    pub async fn reload(&self) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.series.clear();

        if !self.file.exists() {
            tracing::info!(node_id = %self.node_id, "no data file to reload");
            return Ok(());
        }

        match self.file.read() {
            Ok(records) => {
                let count = records.len();
                load_records(&mut state.series, records);
                tracing::info!(
                    node_id = %self.node_id,
                    records = count,
                    series = state.series.len(),
                    "reloaded data file"
                );
                Ok(())
            }
            Err(ColumnarError::Io(e)) => Err(StoreError::Io(e)),
            Err(e) => {
                tracing::warn!(node_id = %self.node_id, "data file unreadable on reload: {e}");
                Ok(())
            }
        }
    }

    /// Drain any pending batch. Called once at shutdown.
    pub async fn close(&self) {
        let pending = self.pending_len().await;
        if pending > 0 {
            tracing::info!(
                node_id = %self.node_id,
                pending,
                "closing store, draining remaining records"
            );
        }
        self.drain().await;
    }
}

fn load_records(series: &mut HashMap<String, SeriesIndex>, records: Vec<Record>) {
    for record in records {
        let storage_key = format!(
            "{}{}{}",
            record.device_id,
            pulse_common::SERIES_KEY_SEPARATOR,
            record.metric_name
        );
        series
            .entry(storage_key)
            .or_default()
            .insert(record.timestamp, record.value, Role::Primary);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
