//! Short-lived write destinations for objects that do not exist yet.
//!
//! Nothing is persisted when a session is issued: if the client never
//! uploads, no trace remains. Expiry and single use are enforced by the
//! backing store.

use crate::{
    models::category::Category,
    services::{
        backend::{BackendError, ObjectBackend},
        path_codec::{CodecError, PathCodec},
    },
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Default lifetime of an upload URL.
pub const DEFAULT_UPLOAD_TTL_SECS: u64 = 900;

const MAX_UPLOAD_TTL_SECS: u64 = 7 * 24 * 3600;

#[derive(Debug, Error)]
pub enum SessionIssueError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("backing store could not sign an upload URL: {0}")]
    Signing(#[from] BackendError),
}

/// A signed write destination for exactly one future object.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    #[serde(rename = "uploadURL")]
    pub url: String,
    pub expires_at: DateTime<Utc>,
    /// Externalized path the object will be served from once written.
    pub object_path: String,
}

#[derive(Clone)]
pub struct UploadSessionIssuer {
    codec: Arc<PathCodec>,
    backend: Arc<dyn ObjectBackend>,
    ttl: Duration,
}

impl UploadSessionIssuer {
    pub fn new(codec: Arc<PathCodec>, backend: Arc<dyn ObjectBackend>, ttl_secs: u64) -> Self {
        Self {
            codec,
            backend,
            ttl: Duration::seconds(ttl_secs.min(MAX_UPLOAD_TTL_SECS) as i64),
        }
    }

    /// Allocate a fresh object name under `category` and sign a `PUT` for it.
    pub async fn issue_upload_session(
        &self,
        category: Category,
    ) -> Result<UploadSession, SessionIssueError> {
        let now = Utc::now();
        let object_name = self.codec.new_object_name(category, now)?;
        let layout = self.codec.layout(category)?;
        let cloud_path = format!("/{}/{}", self.codec.bucket(), object_name);
        let object_path = self.codec.externalize(&cloud_path, layout.visibility)?;
        let expires_at = now + self.ttl;

        let url = self
            .backend
            .presign_put(self.codec.bucket(), &object_name, expires_at)
            .await
            .inspect_err(|err| tracing::error!(%category, error = %err, "failed to sign upload URL"))?;

        tracing::info!(%category, %object_path, %expires_at, "issued upload session");
        Ok(UploadSession {
            url,
            expires_at,
            object_path,
        })
    }
}
