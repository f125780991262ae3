//! Shared value types for the ChangeSync domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! invariants that participate in domain decisions: a [`FileStatus`] is one of
//! exactly three values, a [`ChangeEvent`] is immutable once built, and a
//! [`ConsolidatedChanges`] partition is disjoint by construction.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{InvalidFileChange, QueueError};
use crate::{DeliveryId, Filename, RepositoryId, SourceId};

// ---------------------------------------------------------------------------
// File changes
// ---------------------------------------------------------------------------

/// One file's status within a single change-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// The file did not exist before the change-set.
    Added,
    /// The file existed and its content changed.
    Modified,
    /// The file no longer exists after the change-set.
    Removed,
}

impl FileStatus {
    /// Returns the wire representation of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Added => "added",
            FileStatus::Modified => "modified",
            FileStatus::Removed => "removed",
        }
    }
}

impl FromStr for FileStatus {
    type Err = InvalidFileChange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(FileStatus::Added),
            "modified" => Ok(FileStatus::Modified),
            "removed" => Ok(FileStatus::Removed),
            other => Err(InvalidFileChange::UnknownStatus {
                status: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------

/// One file's status within a [`ChangeEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Path of the file; the merge key of the consolidation table.
    pub filename: Filename,
    /// What happened to the file in this change-set.
    pub status: FileStatus,
}

impl FileChange {
    /// Creates a [`FileChange`] from already-validated parts.
    pub fn new(filename: Filename, status: FileStatus) -> Self {
        Self { filename, status }
    }
}

impl TryFrom<ChangedFile> for FileChange {
    type Error = InvalidFileChange;

    fn try_from(raw: ChangedFile) -> Result<Self, Self::Error> {
        let status = raw.status.parse::<FileStatus>()?;
        let filename = Filename::new(raw.filename).ok_or(InvalidFileChange::EmptyFilename)?;
        Ok(Self { filename, status })
    }
}

/// An unvalidated file record as reported by the changed-files lookup.
///
/// Validation into a [`FileChange`] happens at ingestion; nothing downstream of
/// the endpoint ever sees this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    /// Path reported by the lookup.
    pub filename: String,
    /// Status string reported by the lookup.
    pub status: String,
}

impl ChangedFile {
    /// Creates a raw record.
    pub fn new(filename: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            status: status.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Change events
// ---------------------------------------------------------------------------

/// One accepted notification describing the file changes of one change-set.
///
/// This is also the queue wire format:
///
/// ```json
/// {"source_id": 42, "occurred_at": "2024-05-01T12:00:00Z",
///  "file_changes": [{"filename": "a.py", "status": "added"}]}
/// ```
///
/// Fields are private; an event is immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    source_id: SourceId,
    occurred_at: Timestamp,
    file_changes: Vec<FileChange>,
}

impl ChangeEvent {
    /// Creates a new event. The order of `file_changes` is preserved.
    pub fn new(source_id: SourceId, occurred_at: Timestamp, file_changes: Vec<FileChange>) -> Self {
        Self {
            source_id,
            occurred_at,
            file_changes,
        }
    }

    /// The originating change-set.
    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    /// The timestamp supplied by the origin system.
    pub fn occurred_at(&self) -> Timestamp {
        self.occurred_at
    }

    /// The file changes in the order they were reported.
    pub fn file_changes(&self) -> &[FileChange] {
        &self.file_changes
    }

    /// Serializes this event into its queue payload.
    pub fn to_wire(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::Encode {
            message: e.to_string(),
        })
    }

    /// Decodes a queue payload.
    ///
    /// Any payload that does not describe a well-formed event (invalid JSON,
    /// an unknown status, an empty filename) yields [`QueueError::Malformed`].
    pub fn from_wire(payload: &str) -> Result<Self, QueueError> {
        serde_json::from_str(payload).map_err(|e| QueueError::Malformed {
            message: e.to_string(),
            payload: payload.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Inbound notifications
// ---------------------------------------------------------------------------

/// Normalized view of one inbound webhook delivery.
///
/// Built by the HTTP receiver from headers and body; the ingestion endpoint
/// decides whether it describes a merged change-set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InboundNotification {
    /// The event type header (e.g. `"pull_request"`).
    pub event_type: String,
    /// The payload `action` field (e.g. `"closed"`).
    pub action: Option<String>,
    /// Whether the pull request was merged.
    pub merged: bool,
    /// The pull request number.
    pub source_id: Option<SourceId>,
    /// The repository the pull request belongs to.
    pub repository: Option<RepositoryId>,
    /// When the pull request was merged, if reported.
    pub merged_at: Option<Timestamp>,
    /// Delivery identifier for log correlation.
    pub delivery_id: Option<DeliveryId>,
}

// ---------------------------------------------------------------------------
// Consolidated output
// ---------------------------------------------------------------------------

/// The three disjoint filename groups handed to downstream processing on flush.
///
/// Each list is ordered by filename.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConsolidatedChanges {
    /// Files whose latest status is `added`.
    pub added: Vec<Filename>,
    /// Files whose latest status is `modified`.
    pub modified: Vec<Filename>,
    /// Files whose latest status is `removed`.
    pub removed: Vec<Filename>,
}

impl ConsolidatedChanges {
    /// Total number of files across all three groups.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    /// Returns `true` if no group contains a file.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly. Serialized as RFC 3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Parses an RFC 3339 string such as GitHub's `merged_at`.
    pub fn parse_rfc3339(value: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|dt| Self(dt.with_timezone(&Utc)))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ts() -> Timestamp {
        Timestamp::parse_rfc3339("2024-05-01T12:00:00Z").unwrap()
    }

    fn change(name: &str, status: FileStatus) -> FileChange {
        FileChange::new(Filename::new(name).unwrap(), status)
    }

    #[test]
    fn status_parses_only_the_three_known_values() {
        assert_eq!("added".parse::<FileStatus>().unwrap(), FileStatus::Added);
        assert_eq!("modified".parse::<FileStatus>().unwrap(), FileStatus::Modified);
        assert_eq!("removed".parse::<FileStatus>().unwrap(), FileStatus::Removed);

        for bad in ["renamed", "Added", "", "copied"] {
            assert!(matches!(
                bad.parse::<FileStatus>(),
                Err(InvalidFileChange::UnknownStatus { .. })
            ));
        }
    }

    #[test]
    fn changed_file_validation() {
        let ok = FileChange::try_from(ChangedFile::new("a.py", "modified")).unwrap();
        assert_eq!(ok, change("a.py", FileStatus::Modified));

        assert_eq!(
            FileChange::try_from(ChangedFile::new("", "added")),
            Err(InvalidFileChange::EmptyFilename)
        );
        assert!(FileChange::try_from(ChangedFile::new("a.py", "renamed")).is_err());
    }

    #[test]
    fn wire_format_matches_documented_shape() {
        let event = ChangeEvent::new(
            SourceId::new(42),
            ts(),
            vec![change("a.py", FileStatus::Added), change("a.py", FileStatus::Modified)],
        );

        let value: serde_json::Value = serde_json::from_str(&event.to_wire().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "source_id": 42,
                "occurred_at": "2024-05-01T12:00:00Z",
                "file_changes": [
                    {"filename": "a.py", "status": "added"},
                    {"filename": "a.py", "status": "modified"},
                ]
            })
        );
    }

    #[test]
    fn from_wire_rejects_unknown_status() {
        let payload = r#"{"source_id":1,"occurred_at":"2024-05-01T12:00:00Z",
            "file_changes":[{"filename":"x","status":"renamed"}]}"#;
        match ChangeEvent::from_wire(payload) {
            Err(QueueError::Malformed { payload: p, .. }) => assert_eq!(p, payload),
            other => panic!("expected malformed payload, got {other:?}"),
        }
    }

    #[test]
    fn from_wire_rejects_empty_filename_and_garbage() {
        let empty = r#"{"source_id":1,"occurred_at":"2024-05-01T12:00:00Z",
            "file_changes":[{"filename":"","status":"added"}]}"#;
        assert!(matches!(
            ChangeEvent::from_wire(empty),
            Err(QueueError::Malformed { .. })
        ));
        assert!(matches!(
            ChangeEvent::from_wire("not json"),
            Err(QueueError::Malformed { .. })
        ));
    }

    #[test]
    fn consolidated_changes_counts_all_groups() {
        let changes = ConsolidatedChanges {
            added: vec![Filename::new("a").unwrap()],
            modified: vec![],
            removed: vec![Filename::new("b").unwrap(), Filename::new("c").unwrap()],
        };
        assert_eq!(changes.len(), 3);
        assert!(!changes.is_empty());
        assert!(ConsolidatedChanges::default().is_empty());
    }
}
