//! Key-value metadata attached to stored objects.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata key under which the serialized `AccessPolicy` is stored.
pub const ACL_POLICY_METADATA_KEY: &str = "custom:aclPolicy";

/// One metadata entry of a stored object.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Owning object (`objects.id`).
    pub object_id: String,

    /// Metadata key, e.g. `custom:aclPolicy`.
    pub key: String,

    /// Metadata value as plain text.
    pub value: String,
}
