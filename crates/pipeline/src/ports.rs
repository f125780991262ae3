//! Port traits implemented by infrastructure crates.
//!
//! The orchestration layer depends only on these traits. Concrete adapters
//! (Redis, the GitHub REST API, in-memory doubles) live in other crates.

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{LookupError, QueueError};
use crate::types::{ChangeEvent, ChangedFile, ConsolidatedChanges};
use crate::{RepositoryId, SourceId};

/// Ordered hand-off between concurrent producers and a single consumer loop.
///
/// Implementations must be FIFO across the whole queue. `pop` is destructive:
/// a returned event is no longer visible to anyone else, and there is no
/// acknowledgement step.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Appends `event` to the tail. Returns only after the broker has accepted it.
    ///
    /// Retrying on [`QueueError::Unavailable`] is the caller's responsibility.
    async fn push(&self, event: &ChangeEvent) -> Result<(), QueueError>;

    /// Removes and returns the head, or `None` if nothing arrives within `timeout`.
    ///
    /// A payload that cannot be decoded is still removed and surfaces as
    /// [`QueueError::Malformed`].
    async fn pop(&self, timeout: Duration) -> Result<Option<ChangeEvent>, QueueError>;
}

/// Resolves the full list of changed files for one change-set.
#[async_trait]
pub trait ChangedFilesSource: Send + Sync {
    /// Returns the files touched by `source_id` in `repository`, in provider order.
    async fn changed_files(
        &self,
        repository: &RepositoryId,
        source_id: SourceId,
    ) -> Result<Vec<ChangedFile>, LookupError>;
}

/// Downstream "process consolidated changes" step.
///
/// Fire-and-forget from the worker's perspective: no response is required and
/// implementations handle their own failures.
#[async_trait]
pub trait ConsolidatedChangesSink: Send + Sync {
    /// Receives one flushed partition.
    async fn process(&self, changes: ConsolidatedChanges);
}
