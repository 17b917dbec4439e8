use crate::services::{
    acl::AclError, backend::BackendError, migration::MigrationError, path_codec::CodecError,
    upload_sessions::SessionIssueError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<CodecError> for AppError {
    fn from(err: CodecError) -> Self {
        AppError::bad_request(err.to_string())
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        match &err {
            BackendError::ObjectNotFound { .. } => AppError::not_found(err.to_string()),
            BackendError::ObjectExists { .. } => AppError::new(StatusCode::CONFLICT, err.to_string()),
            BackendError::InvalidObjectKey => AppError::bad_request(err.to_string()),
            BackendError::InvalidSignature | BackendError::UploadExpired(_) => {
                AppError::forbidden(err.to_string())
            }
            BackendError::Credentials(_) | BackendError::Sqlx(_) | BackendError::Io(_) => {
                tracing::error!(error = %err, "backing store failure");
                AppError::internal("object storage unavailable")
            }
        }
    }
}

impl From<AclError> for AppError {
    fn from(err: AclError) -> Self {
        match err {
            AclError::MetadataWrite { source, .. } | AclError::MetadataRead { source, .. }
                if matches!(source, BackendError::ObjectNotFound { .. }) =>
            {
                source.into()
            }
            other => {
                tracing::error!(error = %other, "ACL metadata failure");
                AppError::internal(other.to_string())
            }
        }
    }
}

impl From<SessionIssueError> for AppError {
    fn from(err: SessionIssueError) -> Self {
        tracing::error!(error = %err, "upload session not issued");
        AppError::internal("failed to issue upload URL")
    }
}

impl From<MigrationError> for AppError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::ConnectionFatal { .. } => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            MigrationError::Report(_) => AppError::internal(err.to_string()),
        }
    }
}
