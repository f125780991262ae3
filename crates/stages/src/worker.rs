//! Consolidation worker: the single consumer of the change-event queue.
//!
//! # Loop
//!
//! 1. **Poll**: `pop(poll_timeout)`. Nothing arrived: sleep `idle_sleep` and
//!    poll again. A malformed payload: log it, drop it, poll again.
//! 2. **Fold**: write every file change of the event into the
//!    [`ConsolidatedState`], overwriting earlier entries for the same filename.
//! 3. **Flush**: when the [`FlushPolicy`] says so, partition the state into
//!    added/modified/removed, hand it to the sink, and clear it.
//!
//! The state is owned by the worker alone. Shutdown is observed only between
//! steps, so an in-flight pop/fold/flush always completes; the remainder of
//! the queue is left for the next run.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use pipeline::{
    Backoff, ChangeEvent, ConsolidatedChangesSink, ConsolidatedState, EventQueue, QueueError,
    RetryPolicy,
};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// When folded events are flushed downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPolicy {
    /// Flush after every folded event. Consolidation only merges filenames
    /// repeated within a single event.
    #[default]
    EveryEvent,
    /// Accumulate up to `max_events` folded events, flushing early whenever a
    /// poll times out (the queue was observed empty for one poll interval).
    Batched {
        /// Flush once this many events have been folded.
        max_events: NonZeroUsize,
    },
}

/// Tuning for [`ConsolidationWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// How long one pop waits for an event.
    pub poll_timeout: Duration,
    /// Pause after an empty poll, keeping the idle loop off the CPU.
    pub idle_sleep: Duration,
    /// Flush cadence.
    pub flush_policy: FlushPolicy,
    /// Delay schedule after consecutive queue failures.
    pub error_backoff: Backoff,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            idle_sleep: Duration::from_secs(1),
            flush_policy: FlushPolicy::EveryEvent,
            error_backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(30)),
        }
    }
}

/// What one [`ConsolidationWorker::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// No event arrived within the poll timeout. `flushed` is set when a
    /// pending batch was flushed because the queue drained.
    Idle {
        /// Whether a pending batch was flushed.
        flushed: bool,
    },
    /// An event was folded into the state.
    Folded {
        /// Whether the fold was followed by a flush.
        flushed: bool,
    },
    /// A payload was removed from the queue but could not be decoded.
    Dropped,
    /// The queue could not be reached; the worker backed off.
    QueueUnavailable,
}

/// Drains the queue and maintains the consolidated per-filename state.
pub struct ConsolidationWorker {
    queue: Arc<dyn EventQueue>,
    sink: Arc<dyn ConsolidatedChangesSink>,
    config: WorkerConfig,
    state: ConsolidatedState,
    pending_events: usize,
    consecutive_failures: u32,
    retry_after: Option<Duration>,
}

impl ConsolidationWorker {
    /// Creates a worker with an empty state.
    pub fn new(
        queue: Arc<dyn EventQueue>,
        sink: Arc<dyn ConsolidatedChangesSink>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            sink,
            config,
            state: ConsolidatedState::new(),
            pending_events: 0,
            consecutive_failures: 0,
            retry_after: None,
        }
    }

    /// The current consolidation table.
    pub fn state(&self) -> &ConsolidatedState {
        &self.state
    }

    /// Runs until `shutdown` carries `true` (or its sender is dropped).
    ///
    /// Any batch still pending when shutdown is observed is flushed before
    /// returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_timeout = ?self.config.poll_timeout,
            flush_policy = ?self.config.flush_policy,
            "Consolidation worker started"
        );

        loop {
            let stop = *shutdown.borrow() || shutdown.has_changed().is_err();
            if stop {
                break;
            }

            let outcome = self.step().await;
            let pause = match outcome {
                StepOutcome::Idle { .. } => self.config.idle_sleep,
                StepOutcome::QueueUnavailable => self.retry_after.unwrap_or_else(|| {
                    self.config
                        .error_backoff
                        .delay(self.consecutive_failures.saturating_sub(1))
                }),
                StepOutcome::Folded { .. } | StepOutcome::Dropped => continue,
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if self.pending_events > 0 {
            self.flush().await;
        }
        info!("Consolidation worker stopped");
    }

    /// Performs one Poll and, if an event arrived, its Fold and any Flush.
    #[instrument(skip(self), level = "debug")]
    pub async fn step(&mut self) -> StepOutcome {
        match self.queue.pop(self.config.poll_timeout).await {
            Ok(Some(event)) => {
                self.consecutive_failures = 0;
                self.fold(&event);
                let flushed = match self.config.flush_policy {
                    FlushPolicy::EveryEvent => true,
                    FlushPolicy::Batched { max_events } => self.pending_events >= max_events.get(),
                };
                if flushed {
                    self.flush().await;
                }
                StepOutcome::Folded { flushed }
            }
            Ok(None) => {
                self.consecutive_failures = 0;
                let flushed = self.pending_events > 0;
                if flushed {
                    self.flush().await;
                }
                StepOutcome::Idle { flushed }
            }
            Err(err) => match err.retry_policy() {
                RetryPolicy::NonRetryable => {
                    self.consecutive_failures = 0;
                    let payload = match &err {
                        QueueError::Malformed { payload, .. } => payload.as_str(),
                        _ => "",
                    };
                    error!(error = %err, %payload, "Dropping malformed change event");
                    StepOutcome::Dropped
                }
                RetryPolicy::Retryable { after } => {
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                    self.retry_after = after;
                    warn!(
                        error = %err,
                        consecutive_failures = self.consecutive_failures,
                        "Queue pop failed"
                    );
                    StepOutcome::QueueUnavailable
                }
            },
        }
    }

    fn fold(&mut self, event: &ChangeEvent) {
        let applied = self.state.fold(event);
        self.pending_events += 1;
        debug!(
            source_id = %event.source_id(),
            occurred_at = %event.occurred_at(),
            file_changes = applied,
            tracked_files = self.state.len(),
            "Folded change event"
        );
    }

    async fn flush(&mut self) {
        let changes = self.state.flush();
        let events = std::mem::take(&mut self.pending_events);
        debug!(events, files = changes.len(), "Flushing consolidated changes");
        self.sink.process(changes).await;
    }
}
