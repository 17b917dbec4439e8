//! Administrative operations.

use crate::{
    errors::AppError,
    handlers::principal::RequestPrincipal,
    models::{
        diagnostics::{CleanupReport, StorageHealthReport},
        migration::{ReferenceCounts, ReferenceResults},
        policy::Principal,
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const ADMIN_GROUP: &str = "admin";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateReferencesResponse {
    pub success: bool,
    pub message: String,
    pub results: TableResults,
    pub total_updated: usize,
    pub total_errors: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TableResults {
    pub users: TableCounts,
    pub activities: TableCounts,
    pub documents: TableCounts,
    pub news: TableCounts,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TableCounts {
    pub updated: usize,
    pub errors: usize,
}

impl From<ReferenceCounts> for TableCounts {
    fn from(c: ReferenceCounts) -> Self {
        Self {
            updated: c.updated,
            errors: c.errors,
        }
    }
}

impl From<ReferenceResults> for TableResults {
    fn from(r: ReferenceResults) -> Self {
        Self {
            users: r.users.into(),
            activities: r.activities.into(),
            documents: r.documents.into(),
            news: r.news.into(),
        }
    }
}

/// `POST /api/admin/migrate-file-references`
///
/// Rewrites every legacy reference still in the database. Per-row failures
/// are counted in the body; the request itself only fails when the caller
/// is not an administrator or a dependency is unreachable.
pub async fn migrate_file_references(
    State(state): State<AppState>,
    principal: RequestPrincipal,
) -> Result<Json<MigrateReferencesResponse>, AppError> {
    let caller = require_admin(&principal)?;

    let engine = state.migration_engine();
    engine.check_connectivity().await?;
    let results = engine.migrate_references(&HashSet::new()).await;
    let total_updated = results.total_updated();
    let total_errors = results.total_errors();
    tracing::info!(caller = %caller.id, total_updated, total_errors, "file references migrated");

    Ok(Json(MigrateReferencesResponse {
        success: true,
        message: format!("Migrated {total_updated} file references ({total_errors} errors)"),
        results: results.into(),
        total_updated,
        total_errors,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupQuery {
    /// Defaults to a dry run; pass `dryRun=false` to clear references.
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
}

fn default_dry_run() -> bool {
    true
}

/// `GET /api/admin/storage-diagnostics`
pub async fn storage_diagnostics(
    State(state): State<AppState>,
    principal: RequestPrincipal,
) -> Result<Json<StorageHealthReport>, AppError> {
    require_admin(&principal)?;
    Ok(Json(state.diagnostics().diagnose().await))
}

/// `POST /api/admin/storage-diagnostics/cleanup?dryRun=`
pub async fn cleanup_missing_references(
    State(state): State<AppState>,
    principal: RequestPrincipal,
    Query(q): Query<CleanupQuery>,
) -> Result<Json<CleanupReport>, AppError> {
    let caller = require_admin(&principal)?;
    let report = state.diagnostics().cleanup_missing_references(q.dry_run).await;
    tracing::info!(caller = %caller.id, dry_run = q.dry_run, cleaned = report.cleaned, "reference cleanup requested");
    Ok(Json(report))
}

/// 401 for anonymous callers, 403 outside the admin group.
fn require_admin(principal: &RequestPrincipal) -> Result<&Principal, AppError> {
    let Some(caller) = principal.principal() else {
        return Err(AppError::new(StatusCode::UNAUTHORIZED, "authentication required"));
    };
    if !caller.in_group(ADMIN_GROUP) {
        return Err(AppError::forbidden("administrator access required"));
    }
    Ok(caller)
}
