//! Reference-integrity findings over the domain tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What is wrong with a stored file reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceIssue {
    /// Externalized path whose object is not in the store.
    MissingObject,
    /// Starts with an object route but cannot be resolved to a bucket path.
    InvalidPath,
    /// Still points into the legacy `uploads/` tree.
    LegacyPath,
    /// The store could not answer; nothing is known about the object.
    CheckFailed,
}

impl fmt::Display for ReferenceIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReferenceIssue::MissingObject => "missing_object",
            ReferenceIssue::InvalidPath => "invalid_path",
            ReferenceIssue::LegacyPath => "legacy_path",
            ReferenceIssue::CheckFailed => "check_failed",
        };
        f.write_str(s)
    }
}

/// One row whose reference needs attention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticResult {
    pub entity_type: String,
    pub entity_id: i64,
    pub expected_path: String,
    pub exists: bool,
    pub issue: ReferenceIssue,
    /// A legacy path with a known mapping can still be migrated. Lost
    /// objects cannot be recovered.
    pub fixable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Reference counts across every reference column, plus the rows with issues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageHealthReport {
    pub checked_at: DateTime<Utc>,
    /// Rows holding a non-empty reference.
    pub total_references: usize,
    /// References under `/objects/` or `/public-objects/`.
    pub object_references: usize,
    pub legacy_references: usize,
    /// Anything else, such as absolute URLs to other hosts. Never checked.
    pub external_references: usize,
    pub missing_objects: usize,
    /// Tables that could not be read at all.
    pub table_errors: usize,
    pub issues: Vec<DiagnosticResult>,
}

/// Outcome of clearing references to objects that no longer exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub dry_run: bool,
    pub checked_at: DateTime<Utc>,
    /// Rows actually cleared. Always zero on a dry run.
    pub cleaned: usize,
    pub errors: usize,
    /// One line per reference that was (or would be) cleared.
    pub changes: Vec<String>,
}
