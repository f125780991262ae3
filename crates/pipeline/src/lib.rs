//! Core domain for ChangeSync.
//!
//! ChangeSync receives merged pull request notifications, buffers them on a
//! durable queue, and folds the changed files of each event into a per-filename
//! table before handing a consolidated view downstream.
//!
//! This crate contains every domain concept, newtype identifier, value type,
//! and error type used throughout the workspace. Infrastructure crates
//! implement the traits defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`SourceId`, `Filename`, `RepositoryId`, `DeliveryId`) |
//! | [`types`] | Value types (`ChangeEvent`, `FileChange`, `FileStatus`, `ConsolidatedChanges`, etc.) |
//! | [`consolidation`] | The per-filename merge table (`ConsolidatedState`) |
//! | [`errors`] | Error taxonomy, ingestion rejections, retry and back-off policy |
//! | [`ports`] | Traits for the queue, the changed-files lookup, and the downstream sink |

pub mod consolidation;
pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use consolidation::{ConsolidatedEntry, ConsolidatedState};
pub use errors::{
    Backoff, InvalidFileChange, LookupError, QueueError, RejectReason, Rejection, RetryPolicy,
};
pub use identifiers::{DeliveryId, EmptyIdentifier, Filename, RepositoryId, SourceId};
pub use ports::{ChangedFilesSource, ConsolidatedChangesSink, EventQueue};
pub use types::{
    ChangeEvent, ChangedFile, ConsolidatedChanges, FileChange, FileStatus, InboundNotification,
    Timestamp,
};
