//! Upload URL issuance and post-upload ACL attachment.

use crate::{
    errors::AppError,
    handlers::{admin_handlers::ADMIN_GROUP, principal::RequestPrincipal},
    models::{
        category::{Category, Visibility},
        policy::{ObjectPermission, SYSTEM_OWNER},
    },
    services::{
        acl::evaluate,
        path_codec::{CloudPath, policy_for},
        upload_sessions::UploadSession,
    },
    state::AppState,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct UploadRequest {
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetFileRequest {
    #[serde(rename = "fileURL", alias = "uploadedFileURL")]
    pub file_url: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetFileResponse {
    pub object_path: String,
}

/// `POST /api/objects/upload` with an optional `{category}` body; documents by default.
pub async fn request_upload(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<UploadSession>, AppError> {
    let req: UploadRequest = if body.is_empty() {
        UploadRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::bad_request(format!("invalid request body: {e}")))?
    };
    let category = match req.category.as_deref() {
        Some(raw) => raw
            .parse::<Category>()
            .map_err(|e| AppError::bad_request(e.to_string()))?,
        None => Category::Document,
    };
    Ok(Json(state.issuer.issue_upload_session(category).await?))
}

/// `POST /api/{kind}/upload-url` for `avatars`, `news`, `activities` and `documents`.
pub async fn request_category_upload(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<UploadSession>, AppError> {
    let category = kind
        .parse::<Category>()
        .map_err(|e| AppError::not_found(e.to_string()))?;
    Ok(Json(state.issuer.issue_upload_session(category).await?))
}

/// `PUT /api/objects/set-file`
///
/// Attaches the ACL policy to an object written through an upload URL and
/// returns the path clients should store. The object must already exist.
///
/// A policy-less object accepts its first stamp from any caller. Once a
/// policy is attached, replacing it needs a `write` grant under that policy
/// or membership in the admin group.
pub async fn set_file(
    State(state): State<AppState>,
    principal: RequestPrincipal,
    Json(req): Json<SetFileRequest>,
) -> Result<Json<SetFileResponse>, AppError> {
    let object = resolve_object(&state, &req.file_url)?;
    if let Some(existing) = state.acl.get_policy(&object).await? {
        let caller = principal.principal();
        let admin = caller.is_some_and(|p| p.in_group(ADMIN_GROUP));
        if !admin && !evaluate(Some(&existing), caller, ObjectPermission::Write).is_allowed() {
            tracing::warn!(
                object = %object,
                caller = principal.id().unwrap_or("anonymous"),
                "refused to replace ACL policy"
            );
            return Err(AppError::forbidden("not allowed to change this object's policy"));
        }
    }
    let category = req
        .entity_type
        .as_deref()
        .and_then(|t| t.parse::<Category>().ok());
    let visibility = req
        .visibility
        .or_else(|| {
            category
                .and_then(|c| state.codec.layout(c).ok())
                .map(|layout| layout.visibility)
        })
        .unwrap_or(Visibility::Private);
    let owner = principal.id().unwrap_or(SYSTEM_OWNER);

    let policy = policy_for(visibility, owner);
    state.acl.set_policy(&object, &policy).await?;
    let object_path = state.codec.externalize(&object.to_string(), visibility)?;

    tracing::info!(
        %object_path,
        entity_type = req.entity_type.as_deref().unwrap_or("general"),
        entity_id = req.entity_id.as_deref().unwrap_or(""),
        %owner,
        "file attached"
    );
    Ok(Json(SetFileResponse { object_path }))
}

/// Accept a signed upload URL or an already externalized object path.
fn resolve_object(state: &AppState, file_url: &str) -> Result<CloudPath, AppError> {
    if let Some(object) = state.backend.resolve_upload_url(file_url) {
        if object.bucket != state.codec.bucket() {
            return Err(AppError::bad_request(format!(
                "`{file_url}` does not belong to this storage"
            )));
        }
        return Ok(object);
    }
    let (object, _) = state.codec.internalize(file_url)?;
    Ok(object)
}
