//! Ingestion endpoint: inbound notification in, queued [`ChangeEvent`] out.
//!
//! [`IngestionEndpoint::accept`] applies the acceptance rules in order:
//!
//! 1. Only `pull_request` events are considered.
//! 2. Only `closed` actions with `merged == true` are considered.
//! 3. The notification must name a pull request number and a repository.
//! 4. The changed files are resolved through the [`ChangedFilesSource`] under a
//!    bounded timeout.
//! 5. Every changed file must validate into a [`FileChange`].
//! 6. The event is pushed, retrying transient queue failures with back-off.
//!
//! Exactly one push happens per accepted notification, and `accept` only
//! returns `Ok` after the push succeeded. Rejections are never retried here:
//! the source-control history can be queried again at any time.

use std::sync::Arc;
use std::time::Duration;

use pipeline::{
    Backoff, ChangeEvent, ChangedFilesSource, EventQueue, FileChange, InboundNotification,
    LookupError, QueueError, RejectReason, Rejection, RetryPolicy, SourceId, Timestamp,
};
use tracing::{info, instrument, warn};

/// Event type header value for pull request notifications.
const PULL_REQUEST_EVENT: &str = "pull_request";

/// Action that, together with `merged == true`, marks a merged change-set.
const CLOSED_ACTION: &str = "closed";

/// Tuning for [`IngestionEndpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionConfig {
    /// Upper bound on the changed-files lookup.
    pub lookup_timeout: Duration,
    /// Total push attempts before giving up (at least one is always made).
    pub push_attempts: u32,
    /// Delay schedule between push attempts.
    pub push_backoff: Backoff,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(10),
            push_attempts: 3,
            push_backoff: Backoff::new(Duration::from_millis(100), Duration::from_secs(2)),
        }
    }
}

/// Outcome of a notification that was queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    /// The change-set that was queued.
    pub source_id: SourceId,
    /// Number of file changes carried by the queued event.
    pub file_count: usize,
}

/// Validates inbound notifications and hands accepted ones to the queue.
///
/// Cheap to share: wrap in an [`Arc`] and call `accept` from any number of
/// concurrent request handlers.
pub struct IngestionEndpoint {
    queue: Arc<dyn EventQueue>,
    files: Arc<dyn ChangedFilesSource>,
    config: IngestionConfig,
}

impl IngestionEndpoint {
    /// Creates an endpoint over the given queue and changed-files lookup.
    pub fn new(
        queue: Arc<dyn EventQueue>,
        files: Arc<dyn ChangedFilesSource>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            queue,
            files,
            config,
        }
    }

    /// Converts `notification` into a [`ChangeEvent`] and enqueues it.
    #[instrument(
        skip(self, notification),
        fields(
            event_type = %notification.event_type,
            delivery_id = notification.delivery_id.as_ref().map(|d| d.as_str()),
            source_id = notification.source_id.map(SourceId::as_u64),
        )
    )]
    pub async fn accept(&self, notification: InboundNotification) -> Result<Accepted, Rejection> {
        let result = self.try_accept(notification).await;
        match &result {
            Ok(accepted) => info!(
                source_id = %accepted.source_id,
                file_count = accepted.file_count,
                "Change event queued"
            ),
            Err(rejection) if rejection.reason.is_ignored() => {
                info!(reason = %rejection.reason, detail = %rejection.detail, "Notification ignored")
            }
            Err(rejection) => {
                warn!(reason = %rejection.reason, detail = %rejection.detail, "Notification rejected")
            }
        }
        result
    }

    async fn try_accept(&self, notification: InboundNotification) -> Result<Accepted, Rejection> {
        if notification.event_type != PULL_REQUEST_EVENT {
            return Err(Rejection::new(
                RejectReason::IgnoredEventType,
                format!("not a pull request event: '{}'", notification.event_type),
            ));
        }

        if notification.action.as_deref() != Some(CLOSED_ACTION) || !notification.merged {
            return Err(Rejection::new(
                RejectReason::IgnoredEventType,
                "pull request not merged",
            ));
        }

        let source_id = notification.source_id.ok_or_else(|| {
            Rejection::new(RejectReason::InvalidPayload, "missing pull request number")
        })?;
        let repository = notification.repository.as_ref().ok_or_else(|| {
            Rejection::new(RejectReason::InvalidPayload, "missing repository name")
        })?;

        let raw_files = tokio::time::timeout(
            self.config.lookup_timeout,
            self.files.changed_files(repository, source_id),
        )
        .await
        .unwrap_or(Err(LookupError::TimedOut(self.config.lookup_timeout)))
        .map_err(|e| Rejection::new(RejectReason::UpstreamLookupFailed, e.to_string()))?;

        let file_changes = raw_files
            .into_iter()
            .map(FileChange::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Rejection::new(RejectReason::InvalidFileChange, e.to_string()))?;

        let occurred_at = notification.merged_at.unwrap_or_else(Timestamp::now);
        let event = ChangeEvent::new(source_id, occurred_at, file_changes);

        self.push_with_retry(&event)
            .await
            .map_err(|e| Rejection::new(RejectReason::QueueUnavailable, e.to_string()))?;

        Ok(Accepted {
            source_id,
            file_count: event.file_changes().len(),
        })
    }

    async fn push_with_retry(&self, event: &ChangeEvent) -> Result<(), QueueError> {
        let attempts = self.config.push_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.queue.push(event).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt + 1 < attempts => match err.retry_policy() {
                    RetryPolicy::Retryable { after } => {
                        let delay = after.unwrap_or_else(|| self.config.push_backoff.delay(attempt));
                        warn!(
                            attempt = attempt + 1,
                            ?delay,
                            error = %err,
                            "Queue push failed; retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryPolicy::NonRetryable => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use pipeline::{ChangedFile, FileStatus, LookupError, RepositoryId};

    use super::*;
    use crate::MemoryQueue;

    struct StaticFiles(Vec<ChangedFile>);

    #[async_trait]
    impl ChangedFilesSource for StaticFiles {
        async fn changed_files(
            &self,
            _repository: &RepositoryId,
            _source_id: SourceId,
        ) -> Result<Vec<ChangedFile>, LookupError> {
            Ok(self.0.clone())
        }
    }

    struct FailingFiles;

    #[async_trait]
    impl ChangedFilesSource for FailingFiles {
        async fn changed_files(
            &self,
            _repository: &RepositoryId,
            _source_id: SourceId,
        ) -> Result<Vec<ChangedFile>, LookupError> {
            Err(LookupError::Status {
                status: 502,
                message: "bad gateway".into(),
            })
        }
    }

    struct SlowFiles;

    #[async_trait]
    impl ChangedFilesSource for SlowFiles {
        async fn changed_files(
            &self,
            _repository: &RepositoryId,
            _source_id: SourceId,
        ) -> Result<Vec<ChangedFile>, LookupError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    /// Fails the first `failures` pushes, then forwards to an inner queue.
    struct FlakyQueue {
        failures: u32,
        calls: AtomicU32,
        inner: MemoryQueue,
    }

    #[async_trait]
    impl EventQueue for FlakyQueue {
        async fn push(&self, event: &ChangeEvent) -> Result<(), QueueError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(QueueError::unavailable("connection reset"));
            }
            self.inner.push(event).await
        }

        async fn pop(&self, timeout: Duration) -> Result<Option<ChangeEvent>, QueueError> {
            self.inner.pop(timeout).await
        }
    }

    /// Rejects every push with an error that retrying cannot fix.
    struct EncodingQueue {
        calls: AtomicU32,
    }

    #[async_trait]
    impl EventQueue for EncodingQueue {
        async fn push(&self, _event: &ChangeEvent) -> Result<(), QueueError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(QueueError::Encode {
                message: "serializer failed".into(),
            })
        }

        async fn pop(&self, _timeout: Duration) -> Result<Option<ChangeEvent>, QueueError> {
            Ok(None)
        }
    }

    fn merged(source: u64) -> InboundNotification {
        InboundNotification {
            event_type: "pull_request".into(),
            action: Some("closed".into()),
            merged: true,
            source_id: Some(SourceId::new(source)),
            repository: RepositoryId::new("octo/widgets"),
            merged_at: Timestamp::parse_rfc3339("2024-05-01T12:00:00Z"),
            delivery_id: None,
        }
    }

    fn endpoint(
        queue: Arc<dyn EventQueue>,
        files: impl ChangedFilesSource + 'static,
    ) -> IngestionEndpoint {
        IngestionEndpoint::new(queue, Arc::new(files), IngestionConfig::default())
    }

    #[tokio::test]
    async fn merged_pull_request_is_queued() {
        let queue = Arc::new(MemoryQueue::new());
        let files = StaticFiles(vec![
            ChangedFile::new("a.py", "added"),
            ChangedFile::new("b.py", "removed"),
        ]);
        let accepted = endpoint(queue.clone(), files).accept(merged(42)).await.unwrap();

        assert_eq!(
            accepted,
            Accepted {
                source_id: SourceId::new(42),
                file_count: 2
            }
        );
        let event = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(event.source_id(), SourceId::new(42));
        assert_eq!(event.occurred_at(), merged(42).merged_at.unwrap());
        assert_eq!(event.file_changes()[1].status, FileStatus::Removed);
    }

    #[tokio::test]
    async fn closed_without_merge_is_ignored_and_not_queued() {
        let queue = Arc::new(MemoryQueue::new());
        let mut notification = merged(7);
        notification.merged = false;

        let rejection = endpoint(queue.clone(), StaticFiles(vec![]))
            .accept(notification)
            .await
            .unwrap_err();
        assert_eq!(rejection.reason, RejectReason::IgnoredEventType);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn other_event_types_and_actions_are_ignored() {
        let queue = Arc::new(MemoryQueue::new());
        let endpoint = endpoint(queue.clone(), StaticFiles(vec![]));

        let mut push_event = merged(1);
        push_event.event_type = "push".into();
        let mut reopened = merged(1);
        reopened.action = Some("reopened".into());

        for notification in [push_event, reopened] {
            let rejection = endpoint.accept(notification).await.unwrap_err();
            assert_eq!(rejection.reason, RejectReason::IgnoredEventType);
        }
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn missing_identifiers_are_invalid_payloads() {
        let queue = Arc::new(MemoryQueue::new());
        let endpoint = endpoint(queue.clone(), StaticFiles(vec![]));

        let mut no_number = merged(1);
        no_number.source_id = None;
        let mut no_repo = merged(1);
        no_repo.repository = None;

        for notification in [no_number, no_repo] {
            let rejection = endpoint.accept(notification).await.unwrap_err();
            assert_eq!(rejection.reason, RejectReason::InvalidPayload);
        }
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn lookup_failure_drops_the_event() {
        let queue = Arc::new(MemoryQueue::new());
        let rejection = endpoint(queue.clone(), FailingFiles)
            .accept(merged(3))
            .await
            .unwrap_err();

        assert_eq!(rejection.reason, RejectReason::UpstreamLookupFailed);
        assert!(rejection.detail.contains("502"));
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_timeout_is_an_upstream_failure() {
        let queue = Arc::new(MemoryQueue::new());
        let rejection = endpoint(queue.clone(), SlowFiles)
            .accept(merged(3))
            .await
            .unwrap_err();

        assert_eq!(rejection.reason, RejectReason::UpstreamLookupFailed);
        assert!(rejection.detail.contains("timed out"));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_file_status_rejects_whole_event() {
        let queue = Arc::new(MemoryQueue::new());
        let files = StaticFiles(vec![
            ChangedFile::new("ok.py", "added"),
            ChangedFile::new("weird.py", "renamed"),
        ]);
        let rejection = endpoint(queue.clone(), files)
            .accept(merged(4))
            .await
            .unwrap_err();

        assert_eq!(rejection.reason, RejectReason::InvalidFileChange);
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_push_failures_are_retried() {
        let queue = Arc::new(FlakyQueue {
            failures: 2,
            calls: AtomicU32::new(0),
            inner: MemoryQueue::new(),
        });
        let accepted = endpoint(queue.clone(), StaticFiles(vec![]))
            .accept(merged(8))
            .await
            .unwrap();

        assert_eq!(accepted.source_id, SourceId::new(8));
        assert_eq!(queue.calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.inner.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_queue_outage_is_rejected() {
        let queue = Arc::new(FlakyQueue {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
            inner: MemoryQueue::new(),
        });
        let rejection = endpoint(queue.clone(), StaticFiles(vec![]))
            .accept(merged(8))
            .await
            .unwrap_err();

        assert_eq!(rejection.reason, RejectReason::QueueUnavailable);
        assert_eq!(queue.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_push_failure_is_attempted_once() {
        let queue = Arc::new(EncodingQueue {
            calls: AtomicU32::new(0),
        });
        let rejection = endpoint(queue.clone(), StaticFiles(vec![]))
            .accept(merged(9))
            .await
            .unwrap_err();

        assert_eq!(rejection.reason, RejectReason::QueueUnavailable);
        assert_eq!(queue.calls.load(Ordering::SeqCst), 1);
    }
}
