use super::indexer::EventIndexer;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Run indexing cycles forever, pausing `interval` after each completes.
pub fn spawn_indexer(indexer: Arc<EventIndexer>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            indexer.run_cycle().await;
            let interval = indexer.config().interval;
            info!(secs = interval.as_secs(), "next indexing cycle scheduled");
            tokio::time::sleep(interval).await;
        }
    })
}
