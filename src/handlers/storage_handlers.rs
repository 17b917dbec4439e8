//! Signed write endpoint of the local backing store.

use crate::{errors::AppError, state::AppState};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use std::io;

#[derive(Debug, Deserialize)]
pub struct SignedPutQuery {
    pub expires: i64,
    pub signature: String,
}

/// `PUT /storage/{bucket}/{*key}?expires=&signature=`
///
/// Streams the body to disk once the signature, expiry and write-once
/// checks pass. A concurrent write that claims the key first turns this
/// one into a 409. Responds with the payload's ETag.
pub async fn signed_put(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<SignedPutQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    state
        .store
        .verify_signed_put(&bucket, &key, q.expires, &q.signature)
        .await
        .inspect_err(|err| tracing::warn!(%bucket, %key, error = %err, "signed upload refused"))?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let object = state
        .store
        .create_object_stream(&bucket, &key, content_type, stream)
        .await?;
    tracing::info!(%bucket, %key, size = object.size_bytes, "signed upload stored");

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    if let Some(etag) = object.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            response.headers_mut().insert(header::ETAG, value);
        }
    }
    Ok(response)
}
