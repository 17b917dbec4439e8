//! Per-run migration bookkeeping.
//!
//! These records are transient: they are built during a run, written to a
//! report artifact and dropped. The authoritative state is always the
//! reference columns in the domain tables.

use super::category::{Category, Visibility};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a single file could not be migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemFailure {
    /// The file was enumerated but is no longer on disk.
    NotFound,
    /// The category's legacy directory does not exist.
    DirectoryNotFound,
    /// Directory traversal failed below the category root.
    WalkFailed,
    ReadFailed,
    UploadFailed,
    PolicyFailed,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemFailure::NotFound => "not_found",
            ItemFailure::DirectoryNotFound => "directory_not_found",
            ItemFailure::WalkFailed => "walk_failed",
            ItemFailure::ReadFailed => "read_failed",
            ItemFailure::UploadFailed => "upload_failed",
            ItemFailure::PolicyFailed => "policy_failed",
        };
        f.write_str(s)
    }
}

/// One failed file, relative to its category root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub file: String,
    pub reason: ItemFailure,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ItemError {
    pub fn new(file: impl Into<String>, reason: ItemFailure) -> Self {
        Self {
            file: file.into(),
            reason,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl ToString) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

/// File-pass outcome for one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub category: Category,
    pub description: String,
    pub visibility: Visibility,
    pub total_files: usize,
    pub total_size: u64,
    pub migrated: usize,
    /// Bytes of the successfully migrated files.
    pub migrated_size: u64,
    /// Uploads short-circuited because the object already existed.
    pub skipped: usize,
    pub errors: Vec<ItemError>,
}

impl MigrationRecord {
    pub fn new(category: Category, description: impl Into<String>, visibility: Visibility) -> Self {
        Self {
            category,
            description: description.into(),
            visibility,
            total_files: 0,
            total_size: 0,
            migrated: 0,
            migrated_size: 0,
            skipped: 0,
            errors: Vec::new(),
        }
    }
}

/// Reference-pass counters for one domain table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceCounts {
    pub updated: usize,
    pub errors: usize,
    /// Rows left on their legacy path because their file failed this run.
    #[serde(default)]
    pub held_back: usize,
}

/// Reference-pass counters for every table holding file references.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceResults {
    pub users: ReferenceCounts,
    pub activities: ReferenceCounts,
    pub documents: ReferenceCounts,
    pub news: ReferenceCounts,
}

impl ReferenceResults {
    pub fn total_updated(&self) -> usize {
        self.iter().map(|c| c.updated).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.iter().map(|c| c.errors).sum()
    }

    fn iter(&self) -> impl Iterator<Item = &ReferenceCounts> {
        [&self.users, &self.activities, &self.documents, &self.news].into_iter()
    }
}

/// Aggregate outcome of a full migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    /// Files successfully migrated across all categories.
    pub total_files: usize,
    /// Bytes successfully migrated across all categories.
    pub total_size: u64,
    pub categories: Vec<MigrationRecord>,
    pub references: ReferenceResults,
    pub total_updated: usize,
    pub total_errors: usize,
}
