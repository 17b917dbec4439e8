//! Records produced by the upload-directory audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Operator-facing grouping of audited files, derived from path segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditCategory {
    Activity,
    Document,
    Event,
    Avatar,
    News,
    General,
}

impl AuditCategory {
    /// Label used in the text report.
    pub fn label(&self) -> &'static str {
        match self {
            AuditCategory::Activity => "Legislative activity",
            AuditCategory::Document => "Document",
            AuditCategory::Event => "Event",
            AuditCategory::Avatar => "User avatar",
            AuditCategory::News => "News image",
            AuditCategory::General => "General",
        }
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One file seen by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the scanned root, `/`-separated.
    pub path: String,
    pub size: u64,
    /// Not every filesystem reports a birth time.
    pub created: Option<DateTime<Utc>>,
    pub modified: DateTime<Utc>,
    pub accessed: Option<DateTime<Utc>>,
    /// Lowercase hex MD5 of the content.
    pub hash: String,
    /// Lowercase extension including the dot, empty when there is none.
    pub extension: String,
    pub category: AuditCategory,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub count: usize,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    pub total_files: usize,
    pub total_size: u64,
    pub categories: BTreeMap<AuditCategory, CategorySummary>,
}

/// Result of one audit run. Rendering is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub timestamp: DateTime<Utc>,
    pub audit_period_days: u32,
    pub cutoff: DateTime<Utc>,
    pub summary: AuditSummary,
    /// Newest first.
    pub files: Vec<FileRecord>,
}
