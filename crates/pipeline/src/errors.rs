//! Error taxonomy and retry-policy types for the ChangeSync domain.
//!
//! Every failure in this system degrades to "this one event is dropped and
//! logged". The types here let callers tell the classes apart:
//!
//! - [`Rejection`] is the outcome of ingestion deciding *not* to enqueue a
//!   notification. It is not an error from the HTTP caller's point of view.
//! - [`QueueError`] covers broker unavailability (transient) and payloads that
//!   cannot be decoded (dropped at fold time).
//! - [`LookupError`] is the changed-files collaborator failing.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`]. [`Backoff`]
//! computes the delay schedule callers apply when retrying.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// - `Retryable` errors: broker connection loss, command timeouts.
/// - `NonRetryable` errors: payloads that will never decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

/// Exponential back-off schedule: `initial * 2^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
}

impl Backoff {
    /// Creates a schedule. `max` is raised to `initial` if it is smaller.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Delay to wait before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(30))
    }
}

// ---------------------------------------------------------------------------
// Queue errors
// ---------------------------------------------------------------------------

/// Failures of the durable queue hand-off.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueueError {
    /// The broker could not be reached or did not answer in time.
    ///
    /// Transient: callers retry with back-off. Sustained unavailability fails
    /// the current operation only.
    #[error("queue unavailable: {message}")]
    Unavailable {
        /// Broker-specific description of the failure.
        message: String,
    },

    /// A popped payload does not describe a well-formed change event.
    ///
    /// The payload has already been removed from the queue; it is logged and
    /// dropped.
    #[error("malformed queue payload: {message}")]
    Malformed {
        /// Decoder error.
        message: String,
        /// The raw payload, kept for diagnostics.
        payload: String,
    },

    /// An event could not be serialized for the queue.
    #[error("failed to encode change event: {message}")]
    Encode {
        /// Encoder error.
        message: String,
    },
}

impl QueueError {
    /// Creates an [`QueueError::Unavailable`] from any displayable error.
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        QueueError::Unavailable {
            message: err.to_string(),
        }
    }

    /// Whether retrying the operation can succeed.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            QueueError::Unavailable { .. } => RetryPolicy::Retryable { after: None },
            QueueError::Malformed { .. } | QueueError::Encode { .. } => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------
// Lookup errors
// ---------------------------------------------------------------------------

/// Failures of the "fetch changed files for source_id" collaborator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LookupError {
    /// The request could not be completed (network, TLS, timeout).
    #[error("changed-files request failed: {message}")]
    Transport {
        /// Transport-level description.
        message: String,
    },

    /// The provider answered with a non-success status.
    #[error("changed-files request returned HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// The provider answered with a body that could not be decoded.
    #[error("changed-files response could not be decoded: {message}")]
    Decode {
        /// Decoder error.
        message: String,
    },

    /// The request targeted a repository identifier the provider cannot address.
    #[error("invalid repository identifier '{repository}'")]
    InvalidRepository {
        /// The offending identifier.
        repository: String,
    },

    /// The bounded lookup timeout expired.
    #[error("changed-files lookup timed out after {0:?}")]
    TimedOut(Duration),
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// A changed-file record that cannot become a [`crate::FileChange`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidFileChange {
    /// The status is not one of `added`, `modified`, `removed`.
    #[error("unknown file status '{status}'")]
    UnknownStatus {
        /// The rejected status string.
        status: String,
    },

    /// The filename is empty.
    #[error("file change has an empty filename")]
    EmptyFilename,
}

// ---------------------------------------------------------------------------
// Ingestion outcome
// ---------------------------------------------------------------------------

/// Why ingestion declined to enqueue a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// The notification is not a merged change-set. A deliberate filter, not a failure.
    IgnoredEventType,
    /// The notification is a merged change-set but lacks fields needed to build an event.
    InvalidPayload,
    /// The changed-files lookup failed or timed out.
    UpstreamLookupFailed,
    /// The lookup returned a file record with an unknown status or empty name.
    InvalidFileChange,
    /// The queue push did not succeed within the retry budget.
    QueueUnavailable,
}

impl RejectReason {
    /// Stable machine-readable code (e.g. `"ignored-event-type"`).
    pub fn code(self) -> &'static str {
        match self {
            RejectReason::IgnoredEventType => "ignored-event-type",
            RejectReason::InvalidPayload => "invalid-payload",
            RejectReason::UpstreamLookupFailed => "upstream-lookup-failed",
            RejectReason::InvalidFileChange => "invalid-file-change",
            RejectReason::QueueUnavailable => "queue-unavailable",
        }
    }

    /// Returns `true` for deliberate filtering as opposed to a failed attempt.
    pub fn is_ignored(self) -> bool {
        matches!(self, RejectReason::IgnoredEventType)
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A notification that was not enqueued, with a human-readable detail.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}: {detail}")]
pub struct Rejection {
    /// Classification of the rejection.
    pub reason: RejectReason,
    /// Free-form description for logs and HTTP responses.
    pub detail: String,
}

impl Rejection {
    /// Creates a rejection.
    pub fn new(reason: RejectReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(3), Duration::from_millis(500));
        assert_eq!(backoff.delay(200), Duration::from_millis(500));
    }

    #[test]
    fn backoff_max_never_below_initial() {
        let backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(backoff.delay(0), Duration::from_secs(2));
    }

    #[test]
    fn only_unavailable_queue_errors_are_retryable() {
        assert_eq!(
            QueueError::unavailable("connection refused").retry_policy(),
            RetryPolicy::Retryable { after: None }
        );
        let malformed = QueueError::Malformed {
            message: "eof".into(),
            payload: "{".into(),
        };
        assert_eq!(malformed.retry_policy(), RetryPolicy::NonRetryable);
    }

    #[test]
    fn reject_reason_codes_are_kebab_case() {
        assert_eq!(RejectReason::IgnoredEventType.code(), "ignored-event-type");
        assert_eq!(
            serde_json::to_string(&RejectReason::UpstreamLookupFailed).unwrap(),
            "\"upstream-lookup-failed\""
        );
        assert!(RejectReason::IgnoredEventType.is_ignored());
        assert!(!RejectReason::QueueUnavailable.is_ignored());
    }
}
