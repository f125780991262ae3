//! ChangeSync GitHub infrastructure adapter.
//!
//! Implements [`pipeline::ChangedFilesSource`] by listing the files of a pull
//! request through the GitHub REST API
//! (`GET /repos/{owner}/{repo}/pulls/{number}/files`).
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules. Pagination,
//! authentication headers, and the translation of GitHub's file statuses into
//! the three domain statuses are handled here; the [`pipeline`] crate never
//! sees them.
//!
//! ## Status normalization
//!
//! | GitHub status | Emitted |
//! |---------------|---------|
//! | `added`, `copied` | `added` |
//! | `modified`, `changed` | `modified` |
//! | `removed` | `removed` |
//! | `renamed` | `removed` for the previous name, then `added` for the new name |
//! | `unchanged` | nothing |
//! | anything else | passed through unchanged (ingestion rejects it) |

mod client;
mod files;

pub use client::{GitHubClient, GitHubConfig, GitHubError};
pub use files::{normalize_files, PullRequestFile};
