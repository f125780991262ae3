//! Pull request file records and their translation into domain vocabulary.

use pipeline::ChangedFile;
use serde::Deserialize;

/// One entry of the pull request files listing.
///
/// Only the fields the translation needs are decoded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullRequestFile {
    /// Path of the file after the change.
    pub filename: String,
    /// GitHub's status string.
    pub status: String,
    /// Path before a rename.
    #[serde(default)]
    pub previous_filename: Option<String>,
}

/// Translates GitHub file records into raw domain records, preserving order.
pub fn normalize_files(files: Vec<PullRequestFile>) -> Vec<ChangedFile> {
    let mut changed = Vec::with_capacity(files.len());
    for file in files {
        match file.status.as_str() {
            "added" | "copied" => changed.push(ChangedFile::new(file.filename, "added")),
            "modified" | "changed" => changed.push(ChangedFile::new(file.filename, "modified")),
            "removed" => changed.push(ChangedFile::new(file.filename, "removed")),
            "renamed" => {
                if let Some(previous) = file.previous_filename {
                    changed.push(ChangedFile::new(previous, "removed"));
                }
                changed.push(ChangedFile::new(file.filename, "added"));
            }
            "unchanged" => {}
            _ => changed.push(ChangedFile::new(file.filename, file.status)),
        }
    }
    changed
}
