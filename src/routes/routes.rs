//! Defines the HTTP surface of the storage layer.
//!
//! ## Structure
//! - **Health**
//!   - `GET  /healthz`, `GET /readyz`
//!
//! - **Uploads**
//!   - `POST /api/objects/upload`: upload URL, category from the body (documents by default)
//!   - `POST /api/{kind}/upload-url`: upload URL for `avatars`, `news`, `activities`, `documents`
//!   - `PUT  /api/objects/set-file`: attach the ACL policy after the client wrote the object
//!   - `PUT  /storage/{bucket}/{*key}`: signed write target of the upload URLs
//!
//! - **Serving**
//!   - `GET  /objects/{*path}`: private objects, ACL-checked per principal
//!   - `GET  /public-objects/{*path}`: public objects
//!
//! - **Admin**
//!   - `POST /api/admin/migrate-file-references`
//!   - `GET  /api/admin/storage-diagnostics`
//!   - `POST /api/admin/storage-diagnostics/cleanup?dryRun=`

use crate::{
    handlers::{
        admin_handlers::{cleanup_missing_references, migrate_file_references, storage_diagnostics},
        health_handlers::{healthz, readyz},
        object_handlers::{get_private_object, get_public_object},
        storage_handlers::signed_put,
        upload_handlers::{request_category_upload, request_upload, set_file},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build the router. Shared state (`AppState`) is attached by the caller.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // uploads
        .route("/api/objects/upload", post(request_upload))
        .route("/api/objects/set-file", put(set_file))
        .route("/api/{kind}/upload-url", post(request_category_upload))
        .route("/storage/{bucket}/{*key}", put(signed_put))
        // serving
        .route("/objects/{*path}", get(get_private_object))
        .route("/public-objects/{*path}", get(get_public_object))
        // admin
        .route(
            "/api/admin/migrate-file-references",
            post(migrate_file_references),
        )
        .route("/api/admin/storage-diagnostics", get(storage_diagnostics))
        .route(
            "/api/admin/storage-diagnostics/cleanup",
            post(cleanup_missing_references),
        )
}
