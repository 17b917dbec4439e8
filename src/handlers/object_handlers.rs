//! Serving routes for stored objects.
//!
//! `/objects/*` carries private objects and is gated by each object's ACL
//! policy for the request principal. `/public-objects/*` only serves objects
//! whose policy allows anonymous reads. Bodies are streamed, never buffered.

use crate::{
    errors::AppError,
    handlers::principal::RequestPrincipal,
    models::{
        category::Visibility,
        object::StoredObject,
        policy::{ObjectPermission, Principal},
    },
    services::{acl::evaluate, path_codec::CloudPath},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};

/// Browser and proxy cache lifetime for served objects.
const CACHE_TTL_SECS: u32 = 300;

/// `GET /objects/{*path}`
pub async fn get_private_object(
    State(state): State<AppState>,
    principal: RequestPrincipal,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    serve(&state, Visibility::Private, &path, principal.principal()).await
}

/// `GET /public-objects/{*path}`
pub async fn get_public_object(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    serve(&state, Visibility::Public, &path, None).await
}

async fn serve(
    state: &AppState,
    route: Visibility,
    path: &str,
    principal: Option<&Principal>,
) -> Result<Response, AppError> {
    let external = format!("/{}/{}", route.route_prefix(), path);
    let (object, _) = state.codec.internalize(&external)?;

    let policy = state.acl.get_policy(&object).await?;
    let decision = evaluate(policy.as_ref(), principal, ObjectPermission::Read);
    if !decision.is_allowed() {
        tracing::debug!(object = %object, principal = ?principal.map(|p| &p.id), "read denied");
        return Err(match route {
            // Same answer as a missing object.
            Visibility::Public => AppError::not_found(format!("object `{}` not found", path)),
            Visibility::Private => AppError::forbidden("access denied"),
        });
    }

    stream_object(state, &object, route).await
}

async fn stream_object(
    state: &AppState,
    object: &CloudPath,
    route: Visibility,
) -> Result<Response, AppError> {
    let (meta, body) = state
        .backend
        .open_object(&object.bucket, &object.object_name)
        .await?;

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);
    let cache = format!("{}, max-age={}", route.as_str(), CACHE_TTL_SECS);
    if let Ok(value) = HeaderValue::from_str(&cache) {
        response.headers_mut().insert(header::CACHE_CONTROL, value);
    }
    Ok(response)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &StoredObject) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    let length = meta.size_bytes.max(0);
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&length.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    if let Some(etag) = meta.etag.as_ref() {
        let quoted = format!("\"{}\"", etag);
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }

    let last_modified = meta
        .last_modified
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
