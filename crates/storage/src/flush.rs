//! Background flusher: drains the pending batch on a timer so low-rate
//! series still reach disk.

use crate::store::NodeStore;
use std::sync::Arc;
use tokio::time::interval;

/// Spawn the periodic flush task. The interval comes from the store's
/// [`StoreConfig`](crate::store::StoreConfig).
pub fn spawn_flush_task(store: Arc<NodeStore>) -> tokio::task::JoinHandle<()> {
    let period = store.config().flush_interval;
    tokio::spawn(async move {
        let mut tick = interval(period);
        loop {
            tick.tick().await;
            let pending = store.pending_len().await;
            if pending > 0 {
                tracing::debug!(
                    node_id = store.node_id(),
                    pending,
                    "periodic flush"
                );
                store.drain().await;
            }
        }
    })
}
