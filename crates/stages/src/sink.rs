//! Default downstream step for flushed partitions.

use async_trait::async_trait;
use pipeline::{ConsolidatedChanges, ConsolidatedChangesSink};
use tracing::info;

/// Logs the size of each consolidated group.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

#[async_trait]
impl ConsolidatedChangesSink for LoggingSink {
    async fn process(&self, changes: ConsolidatedChanges) {
        info!(
            added = changes.added.len(),
            modified = changes.modified.len(),
            removed = changes.removed.len(),
            "Processing consolidated changes"
        );
    }
}
