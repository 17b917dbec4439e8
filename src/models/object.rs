//! Represents an object (file) held by the backing store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A stored object row in the local backing store.
///
/// Objects are immutable once written; only their metadata (the ACL policy)
/// is ever rewritten. Deletion is not handled here.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Internal identifier for metadata joins.
    pub id: String,

    /// Backing storage container (process-wide configuration).
    pub bucket: String,

    /// Path of the object inside the bucket, e.g. `.private/documents/2025/03/<uuid>`.
    pub key: String,

    /// Content type (MIME type) supplied on upload.
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 checksum of the payload.
    pub etag: Option<String>,

    /// Timestamp of the last write.
    pub last_modified: DateTime<Utc>,
}
