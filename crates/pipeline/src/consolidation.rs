//! Per-filename merge table owned by the consolidation worker.
//!
//! [`ConsolidatedState`] holds at most one entry per filename. Folding an event
//! overwrites entries unconditionally (last write wins, by fold order), and
//! flushing partitions the table by status and leaves it empty.
//!
//! The table has a single owner and no interior mutability; it is never shared
//! across tasks.

use std::collections::BTreeMap;

use crate::types::{ChangeEvent, ConsolidatedChanges, FileStatus};
use crate::{Filename, SourceId};

/// The merged state of one filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsolidatedEntry {
    /// Status from the most recently folded change touching this file.
    pub status: FileStatus,
    /// The change-set that wrote `status`.
    pub last_source_id: SourceId,
}

/// Transient merge table keyed by filename.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidatedState {
    entries: BTreeMap<Filename, ConsolidatedEntry>,
}

impl ConsolidatedState {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds every file change of `event` into the table, in event order.
    ///
    /// Returns the number of file changes applied.
    pub fn fold(&mut self, event: &ChangeEvent) -> usize {
        let source_id = event.source_id();
        for change in event.file_changes() {
            self.entries.insert(
                change.filename.clone(),
                ConsolidatedEntry {
                    status: change.status,
                    last_source_id: source_id,
                },
            );
        }
        event.file_changes().len()
    }

    /// Partitions the table into added/modified/removed groups and clears it.
    ///
    /// Flushing an empty table yields an empty partition.
    pub fn flush(&mut self) -> ConsolidatedChanges {
        let entries = std::mem::take(&mut self.entries);
        let mut changes = ConsolidatedChanges::default();
        for (filename, entry) in entries {
            match entry.status {
                FileStatus::Added => changes.added.push(filename),
                FileStatus::Modified => changes.modified.push(filename),
                FileStatus::Removed => changes.removed.push(filename),
            }
        }
        changes
    }

    /// Looks up the current entry for `filename`.
    pub fn get(&self, filename: &Filename) -> Option<&ConsolidatedEntry> {
        self.entries.get(filename)
    }

    /// Number of distinct filenames held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
