//! Reference-integrity checks after (or during) a migration.
//!
//! Every non-empty value in [`REFERENCE_COLUMNS`] is classified: object
//! routes are resolved through the codec and looked up in the backing store,
//! legacy `/uploads/...` paths are flagged as still pending, and anything
//! else is counted as external and left alone.

use crate::{
    models::diagnostics::{CleanupReport, DiagnosticResult, ReferenceIssue, StorageHealthReport},
    services::{
        backend::ObjectBackend,
        migration::{REFERENCE_COLUMNS, ReferenceColumn},
        path_codec::{LEGACY_ROOT, PathCodec},
    },
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::fs;
use tracing::{debug, info, warn};

const OBJECT_ROUTES: [&str; 2] = ["/objects/", "/public-objects/"];

pub struct ReferenceDiagnostics {
    codec: Arc<PathCodec>,
    backend: Arc<dyn ObjectBackend>,
    db: Arc<SqlitePool>,
}

impl ReferenceDiagnostics {
    pub fn new(codec: Arc<PathCodec>, backend: Arc<dyn ObjectBackend>, db: Arc<SqlitePool>) -> Self {
        Self { codec, backend, db }
    }

    /// Check every reference column and return counts plus the rows with issues.
    pub async fn diagnose(&self) -> StorageHealthReport {
        let mut report = StorageHealthReport {
            checked_at: Utc::now(),
            ..Default::default()
        };
        for column in &REFERENCE_COLUMNS {
            self.diagnose_column(column, &mut report).await;
        }
        info!(
            total = report.total_references,
            objects = report.object_references,
            legacy = report.legacy_references,
            missing = report.missing_objects,
            issues = report.issues.len(),
            "reference diagnostics finished"
        );
        report
    }

    async fn diagnose_column(&self, column: &ReferenceColumn, report: &mut StorageHealthReport) {
        let (table, col) = (column.table, column.column);
        let select = format!(
            "SELECT id, {col} FROM {table} WHERE {col} IS NOT NULL AND {col} <> '' ORDER BY id"
        );
        let rows: Vec<(i64, String)> = match sqlx::query_as(&select).fetch_all(&*self.db).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(table, error = %err, "failed to read references");
                report.table_errors += 1;
                return;
            }
        };

        for (id, path) in rows {
            report.total_references += 1;
            let finding = if OBJECT_ROUTES.iter().any(|r| path.starts_with(r)) {
                report.object_references += 1;
                self.check_object(&path).await
            } else if path.starts_with(LEGACY_ROOT) {
                report.legacy_references += 1;
                Some(Finding {
                    exists: false,
                    issue: ReferenceIssue::LegacyPath,
                    fixable: self.codec.map_legacy_path(&path).is_some(),
                    detail: None,
                })
            } else {
                report.external_references += 1;
                None
            };

            let Some(finding) = finding else { continue };
            if finding.issue == ReferenceIssue::MissingObject {
                report.missing_objects += 1;
            }
            debug!(table, id, %path, issue = %finding.issue, "reference issue");
            report.issues.push(DiagnosticResult {
                entity_type: column.entity.to_string(),
                entity_id: id,
                expected_path: path,
                exists: finding.exists,
                issue: finding.issue,
                fixable: finding.fixable,
                detail: finding.detail,
            });
        }
    }

    async fn check_object(&self, path: &str) -> Option<Finding> {
        let cloud = match self.codec.internalize(path) {
            Ok((cloud, _)) => cloud,
            Err(err) => {
                return Some(Finding {
                    exists: false,
                    issue: ReferenceIssue::InvalidPath,
                    fixable: false,
                    detail: Some(err.to_string()),
                });
            }
        };
        match self.backend.exists(&cloud.bucket, &cloud.object_name).await {
            Ok(true) => None,
            Ok(false) => Some(Finding {
                exists: false,
                issue: ReferenceIssue::MissingObject,
                fixable: false,
                detail: None,
            }),
            Err(err) => Some(Finding {
                exists: false,
                issue: ReferenceIssue::CheckFailed,
                fixable: false,
                detail: Some(err.to_string()),
            }),
        }
    }

    /// Clear references to objects that are gone for good.
    ///
    /// Only `missing_object` and `invalid_path` findings qualify. A dry run
    /// lists the changes without writing. Each `UPDATE` is conditioned on the
    /// row still holding the diagnosed value.
    pub async fn cleanup_missing_references(&self, dry_run: bool) -> CleanupReport {
        let report = self.diagnose().await;
        let mut cleanup = CleanupReport {
            dry_run,
            checked_at: Utc::now(),
            cleaned: 0,
            errors: 0,
            changes: Vec::new(),
        };

        let dangling = report.issues.iter().filter(|i| {
            matches!(
                i.issue,
                ReferenceIssue::MissingObject | ReferenceIssue::InvalidPath
            )
        });
        for issue in dangling {
            let Some(column) = REFERENCE_COLUMNS.iter().find(|c| c.entity == issue.entity_type)
            else {
                continue;
            };
            cleanup.changes.push(format!(
                "{} {}: remove reference to missing file {}",
                issue.entity_type, issue.entity_id, issue.expected_path
            ));
            if dry_run {
                continue;
            }

            let (table, col) = (column.table, column.column);
            let update = format!("UPDATE {table} SET {col} = NULL WHERE id = ? AND {col} = ?");
            match sqlx::query(&update)
                .bind(issue.entity_id)
                .bind(&issue.expected_path)
                .execute(&*self.db)
                .await
            {
                Ok(done) if done.rows_affected() > 0 => cleanup.cleaned += 1,
                Ok(_) => debug!(table, id = issue.entity_id, "reference changed concurrently, left as is"),
                Err(err) => {
                    cleanup.errors += 1;
                    warn!(table, id = issue.entity_id, error = %err, "failed to clear reference");
                }
            }
        }

        info!(
            dry_run,
            candidates = cleanup.changes.len(),
            cleaned = cleanup.cleaned,
            errors = cleanup.errors,
            "dangling reference cleanup finished"
        );
        cleanup
    }
}

/// Persist `report` as `storage-diagnostics-<timestamp>.json` under `dir`.
pub async fn write_report(report: &StorageHealthReport, dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(dir).await?;
    let path = dir.join(format!(
        "storage-diagnostics-{}.json",
        report.checked_at.format("%Y-%m-%dT%H-%M-%S")
    ));
    fs::write(&path, serde_json::to_vec_pretty(report)?).await?;
    Ok(path)
}

struct Finding {
    exists: bool,
    issue: ReferenceIssue,
    fixable: bool,
    detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        services::{backend::LocalObjectBackend, credentials::StaticCredentialProvider},
    };
    use bytes::Bytes;
    use tempfile::TempDir;

    async fn diagnostics() -> (ReferenceDiagnostics, Arc<dyn ObjectBackend>, Arc<SqlitePool>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(db::connect_in_memory().await.unwrap());
        let backend: Arc<dyn ObjectBackend> = Arc::new(LocalObjectBackend::new(
            pool.clone(),
            dir.path().join("objects"),
            "http://localhost:3000",
            Arc::new(StaticCredentialProvider::new("k")),
        ));
        let codec = Arc::new(PathCodec::new("bucket"));
        (
            ReferenceDiagnostics::new(codec, backend.clone(), pool.clone()),
            backend,
            pool,
            dir,
        )
    }

    async fn exec(pool: &SqlitePool, sql: &str) {
        sqlx::query(sql).execute(pool).await.unwrap();
    }

    #[tokio::test]
    async fn classifies_each_kind_of_reference() {
        let (diag, backend, pool, _dir) = diagnostics().await;
        backend
            .put_object("bucket", ".private/documents/ok.pdf", None, Bytes::from_static(b"pdf"))
            .await
            .unwrap();
        exec(&pool, "INSERT INTO documents (id, title, file_path) VALUES (1, 'a', '/objects/.private/documents/ok.pdf')").await;
        exec(&pool, "INSERT INTO documents (id, title, file_path) VALUES (2, 'b', '/objects/.private/documents/lost.pdf')").await;
        exec(&pool, "INSERT INTO documents (id, title, file_path) VALUES (3, 'c', NULL)").await;
        exec(&pool, "INSERT INTO legislative_activities (id, title, file_path) VALUES (1, 'pl', '/uploads/activities/pl.pdf')").await;
        exec(&pool, "INSERT INTO news_articles (id, title, image_url) VALUES (1, 'n', '/uploads/misc/x.jpg')").await;
        exec(&pool, "INSERT INTO users (id, username, profile_image_url) VALUES (1, 'u', 'https://cdn.example/u.png')").await;
        exec(&pool, "INSERT INTO users (id, username, profile_image_url) VALUES (2, 'v', '/objects/')").await;

        let report = diag.diagnose().await;
        assert_eq!(report.total_references, 6);
        assert_eq!(report.object_references, 3);
        assert_eq!(report.legacy_references, 2);
        assert_eq!(report.external_references, 1);
        assert_eq!(report.missing_objects, 1);

        let find = |entity: &str, id: i64| {
            report
                .issues
                .iter()
                .find(|i| i.entity_type == entity && i.entity_id == id)
                .cloned()
        };
        assert!(find("document", 1).is_none());
        let lost = find("document", 2).unwrap();
        assert_eq!((lost.issue, lost.exists, lost.fixable), (ReferenceIssue::MissingObject, false, false));
        let legacy = find("activity", 1).unwrap();
        assert_eq!((legacy.issue, legacy.fixable), (ReferenceIssue::LegacyPath, true));
        let unmapped = find("news", 1).unwrap();
        assert_eq!((unmapped.issue, unmapped.fixable), (ReferenceIssue::LegacyPath, false));
        assert_eq!(find("user", 2).unwrap().issue, ReferenceIssue::InvalidPath);
        assert_eq!(report.issues.len(), 4);
    }

    #[tokio::test]
    async fn dry_run_lists_without_clearing() {
        let (diag, _backend, pool, _dir) = diagnostics().await;
        exec(&pool, "INSERT INTO documents (id, title, file_path) VALUES (1, 'a', '/objects/.private/documents/lost.pdf')").await;
        exec(&pool, "INSERT INTO legislative_activities (id, title, file_path) VALUES (1, 'pl', '/uploads/activities/pl.pdf')").await;

        let dry = diag.cleanup_missing_references(true).await;
        assert!(dry.dry_run);
        assert_eq!(dry.cleaned, 0);
        assert_eq!(dry.changes.len(), 1);
        assert!(dry.changes[0].contains("/objects/.private/documents/lost.pdf"));

        let still: Option<String> = sqlx::query_scalar("SELECT file_path FROM documents WHERE id = 1")
            .fetch_one(&*pool)
            .await
            .unwrap();
        assert_eq!(still.as_deref(), Some("/objects/.private/documents/lost.pdf"));

        let applied = diag.cleanup_missing_references(false).await;
        assert_eq!(applied.cleaned, 1);
        let cleared: Option<String> = sqlx::query_scalar("SELECT file_path FROM documents WHERE id = 1")
            .fetch_one(&*pool)
            .await
            .unwrap();
        assert_eq!(cleared, None);
        // Legacy references are pending migration, not dangling.
        let legacy: Option<String> =
            sqlx::query_scalar("SELECT file_path FROM legislative_activities WHERE id = 1")
                .fetch_one(&*pool)
                .await
                .unwrap();
        assert_eq!(legacy.as_deref(), Some("/uploads/activities/pl.pdf"));
    }
}
