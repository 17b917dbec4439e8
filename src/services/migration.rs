//! src/services/migration.rs
//!
//! Batch migration of legacy `uploads/` files and the database references
//! pointing at them.
//!
//! A run has two independent passes:
//!
//! 1. **Files**: every file under `uploads/<legacy_dir>/` is uploaded to its
//!    canonical object name and stamped with the category's default policy.
//! 2. **References**: every domain row still holding a `/uploads/...` path is
//!    rewritten to the externalized path. The `UPDATE` is conditioned on the
//!    row still holding the old value, so re-running is a no-op per row.
//!
//! Per-file and per-row failures are counted, never propagated. Only a store
//! or database that is unreachable at the start aborts the run. Uploads are
//! not diffed against existing objects: an object at the same name is
//! overwritten unless `skip_existing` is set.

use crate::{
    models::{
        category::Category,
        migration::{
            ItemError, ItemFailure, MigrationRecord, MigrationReport, ReferenceCounts,
            ReferenceResults,
        },
        policy::SYSTEM_OWNER,
    },
    services::{
        acl::AclStore,
        backend::ObjectBackend,
        path_codec::{CodecError, PathCodec, parse_cloud_path},
    },
};
use bytes::Bytes;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    collections::HashSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("cannot reach {resource}: {reason}")]
    ConnectionFatal {
        resource: &'static str,
        reason: String,
    },
    #[error("failed to write migration report: {0}")]
    Report(#[from] io::Error),
}

/// A domain column holding file references.
pub struct ReferenceColumn {
    pub label: &'static str,
    /// Singular entity name used in diagnostics.
    pub entity: &'static str,
    pub table: &'static str,
    pub column: &'static str,
    slot: fn(&mut ReferenceResults) -> &mut ReferenceCounts,
}

/// Every column the reference pass rewrites.
pub static REFERENCE_COLUMNS: [ReferenceColumn; 4] = [
    ReferenceColumn {
        label: "users",
        entity: "user",
        table: "users",
        column: "profile_image_url",
        slot: users_slot,
    },
    ReferenceColumn {
        label: "activities",
        entity: "activity",
        table: "legislative_activities",
        column: "file_path",
        slot: activities_slot,
    },
    ReferenceColumn {
        label: "documents",
        entity: "document",
        table: "documents",
        column: "file_path",
        slot: documents_slot,
    },
    ReferenceColumn {
        label: "news",
        entity: "news",
        table: "news_articles",
        column: "image_url",
        slot: news_slot,
    },
];

fn users_slot(r: &mut ReferenceResults) -> &mut ReferenceCounts {
    &mut r.users
}

fn activities_slot(r: &mut ReferenceResults) -> &mut ReferenceCounts {
    &mut r.activities
}

fn documents_slot(r: &mut ReferenceResults) -> &mut ReferenceCounts {
    &mut r.documents
}

fn news_slot(r: &mut ReferenceResults) -> &mut ReferenceCounts {
    &mut r.news
}

/// A file found under a category's legacy directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyFile {
    pub local_path: PathBuf,
    /// Path relative to the category root, `/`-separated. This is the file's identity.
    pub relative_path: String,
    pub size: u64,
}

/// Enumeration result for one category.
#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<LegacyFile>,
    pub errors: Vec<ItemError>,
}

pub struct MigrationEngine {
    codec: Arc<PathCodec>,
    backend: Arc<dyn ObjectBackend>,
    acl: AclStore,
    db: Arc<SqlitePool>,
    uploads_dir: PathBuf,
    skip_existing: bool,
}

impl MigrationEngine {
    pub fn new(
        codec: Arc<PathCodec>,
        backend: Arc<dyn ObjectBackend>,
        db: Arc<SqlitePool>,
        uploads_dir: impl Into<PathBuf>,
    ) -> Self {
        let acl = AclStore::new(backend.clone());
        Self {
            codec,
            backend,
            acl,
            db,
            uploads_dir: uploads_dir.into(),
            skip_existing: false,
        }
    }

    /// Skip uploads whose object already exists instead of overwriting it.
    pub fn skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }

    /// Fail fast when the database or the backing store is unreachable.
    pub async fn check_connectivity(&self) -> Result<(), MigrationError> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
            .map_err(|e| MigrationError::ConnectionFatal {
                resource: "database",
                reason: e.to_string(),
            })?;
        self.backend
            .ping()
            .await
            .map_err(|e| MigrationError::ConnectionFatal {
                resource: "object storage",
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Both passes plus the aggregate report.
    pub async fn run(&self) -> Result<MigrationReport, MigrationError> {
        self.check_connectivity().await?;
        let started_at = Utc::now();
        info!(uploads_dir = %self.uploads_dir.display(), "starting migration run");

        let categories = self.migrate_files().await;
        let held_back = self.held_back_paths(&categories);
        let references = self.migrate_references(&held_back).await;

        let finished_at = Utc::now();
        let file_errors: usize = categories.iter().map(|c| c.errors.len()).sum();
        let report = MigrationReport {
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
            total_files: categories.iter().map(|c| c.migrated).sum(),
            total_size: categories.iter().map(|c| c.migrated_size).sum(),
            total_updated: references.total_updated(),
            total_errors: file_errors + references.total_errors(),
            categories,
            references,
        };

        info!(
            total_files = report.total_files,
            total_size = report.total_size,
            total_updated = report.total_updated,
            total_errors = report.total_errors,
            duration_ms = report.duration_ms,
            "migration run finished"
        );
        Ok(report)
    }

    /// File pass over every registered category.
    pub async fn migrate_files(&self) -> Vec<MigrationRecord> {
        let mut records = Vec::new();
        let categories: Vec<Category> = self.codec.layouts().map(|(c, _)| c).collect();
        for category in categories {
            let discovery = match self.discover(category).await {
                Ok(discovery) => discovery,
                Err(err) => {
                    warn!(%category, error = %err, "category not registered");
                    continue;
                }
            };
            let Ok(mut record) = self.migrate_discovered(category, discovery.files).await else {
                continue;
            };
            let mut errors = discovery.errors;
            errors.append(&mut record.errors);
            record.errors = errors;
            records.push(record);
        }
        records
    }

    /// Recursively enumerate the legacy directory of `category`.
    pub async fn discover(&self, category: Category) -> Result<Discovery, CodecError> {
        let layout = self.codec.layout(category)?;
        let root = self.uploads_dir.join(layout.legacy_dir);
        let legacy_dir = layout.legacy_dir;

        if !fs::try_exists(&root).await.unwrap_or(false) {
            warn!(%category, root = %root.display(), "legacy directory not found");
            return Ok(Discovery {
                files: Vec::new(),
                errors: vec![ItemError::new(legacy_dir, ItemFailure::DirectoryNotFound)],
            });
        }

        let walk_root = root.clone();
        let discovery = tokio::task::spawn_blocking(move || walk_category(&walk_root))
            .await
            .unwrap_or_else(|err| Discovery {
                files: Vec::new(),
                errors: vec![ItemError::new(legacy_dir, ItemFailure::WalkFailed).with_detail(err)],
            });

        debug!(%category, files = discovery.files.len(), "enumerated legacy files");
        Ok(discovery)
    }

    /// Upload and stamp each discovered file. Individual failures are
    /// recorded; only an unregistered category is an error.
    pub async fn migrate_discovered(
        &self,
        category: Category,
        files: Vec<LegacyFile>,
    ) -> Result<MigrationRecord, CodecError> {
        let layout = self.codec.layout(category)?;
        let mut record = MigrationRecord::new(category, layout.description, layout.visibility);
        record.total_files = files.len();
        record.total_size = files.iter().map(|f| f.size).sum();
        info!(%category, files = record.total_files, size = record.total_size, "migrating category");

        for file in files {
            match self.migrate_file(category, &file).await {
                Ok(FileOutcome::Migrated(size)) => {
                    record.migrated += 1;
                    record.migrated_size += size;
                    debug!(%category, file = %file.relative_path, "migrated");
                }
                Ok(FileOutcome::Skipped) => {
                    record.skipped += 1;
                    debug!(%category, file = %file.relative_path, "already present, upload skipped");
                }
                Err(err) => {
                    warn!(
                        %category,
                        file = %err.file,
                        reason = %err.reason,
                        detail = err.detail.as_deref().unwrap_or(""),
                        "file migration failed"
                    );
                    record.errors.push(err);
                }
            }
        }
        Ok(record)
    }

    async fn migrate_file(
        &self,
        category: Category,
        file: &LegacyFile,
    ) -> Result<FileOutcome, ItemError> {
        let fail = |reason: ItemFailure| ItemError::new(file.relative_path.clone(), reason);

        // A file that vanished between enumeration and now must not be touched further.
        match fs::metadata(&file.local_path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(fail(ItemFailure::NotFound)),
            Err(err) if err.kind() == ErrorKind::NotFound => return Err(fail(ItemFailure::NotFound)),
            Err(err) => return Err(fail(ItemFailure::ReadFailed).with_detail(err)),
        }

        let cloud = self
            .codec
            .encode_cloud_path(category, &file.relative_path)
            .and_then(|path| parse_cloud_path(&path))
            .map_err(|e| fail(ItemFailure::UploadFailed).with_detail(e))?;
        let policy = self
            .codec
            .default_policy(category, SYSTEM_OWNER)
            .map_err(|e| fail(ItemFailure::PolicyFailed).with_detail(e))?;

        if self.skip_existing {
            let exists = self
                .backend
                .exists(&cloud.bucket, &cloud.object_name)
                .await
                .map_err(|e| fail(ItemFailure::UploadFailed).with_detail(e))?;
            if exists {
                self.acl
                    .set_policy(&cloud, &policy)
                    .await
                    .map_err(|e| fail(ItemFailure::PolicyFailed).with_detail(e))?;
                return Ok(FileOutcome::Skipped);
            }
        }

        let data = fs::read(&file.local_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                fail(ItemFailure::NotFound)
            } else {
                fail(ItemFailure::ReadFailed).with_detail(err)
            }
        })?;
        let size = data.len() as u64;

        self.backend
            .put_object(
                &cloud.bucket,
                &cloud.object_name,
                content_type_for(&file.local_path).map(str::to_string),
                Bytes::from(data),
            )
            .await
            .map_err(|e| fail(ItemFailure::UploadFailed).with_detail(e))?;

        self.acl
            .set_policy(&cloud, &policy)
            .await
            .map_err(|e| fail(ItemFailure::PolicyFailed).with_detail(e))?;

        Ok(FileOutcome::Migrated(size))
    }

    /// Legacy paths of files that failed this run; their rows are left alone.
    pub fn held_back_paths(&self, records: &[MigrationRecord]) -> HashSet<String> {
        records
            .iter()
            .flat_map(|record| {
                record
                    .errors
                    .iter()
                    .filter(|e| {
                        !matches!(
                            e.reason,
                            ItemFailure::DirectoryNotFound | ItemFailure::WalkFailed
                        )
                    })
                    .filter_map(|e| self.codec.encode_legacy(record.category, &e.file).ok())
            })
            .collect()
    }

    /// Reference pass over every domain column.
    pub async fn migrate_references(&self, held_back: &HashSet<String>) -> ReferenceResults {
        let mut results = ReferenceResults::default();
        for column in &REFERENCE_COLUMNS {
            let counts = self.migrate_column(column, held_back).await;
            info!(
                table = column.label,
                updated = counts.updated,
                errors = counts.errors,
                held_back = counts.held_back,
                "reference pass finished"
            );
            *(column.slot)(&mut results) = counts;
        }
        results
    }

    async fn migrate_column(
        &self,
        column: &ReferenceColumn,
        held_back: &HashSet<String>,
    ) -> ReferenceCounts {
        let mut counts = ReferenceCounts::default();
        let (table, col) = (column.table, column.column);

        let select = format!("SELECT id, {col} FROM {table} WHERE {col} LIKE '/uploads/%'");
        let rows: Vec<(i64, String)> = match sqlx::query_as(&select).fetch_all(&*self.db).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(table, error = %err, "failed to select legacy references");
                counts.errors += 1;
                return counts;
            }
        };

        let update = format!("UPDATE {table} SET {col} = ? WHERE id = ? AND {col} = ?");
        for (id, old) in rows {
            if held_back.contains(&old) {
                counts.held_back += 1;
                debug!(table, id, path = %old, "file failed this run, reference left unchanged");
                continue;
            }
            let Some(new) = self.codec.map_legacy_path(&old) else {
                debug!(table, id, path = %old, "no mapping for legacy path");
                continue;
            };

            match sqlx::query(&update)
                .bind(&new)
                .bind(id)
                .bind(&old)
                .execute(&*self.db)
                .await
            {
                Ok(done) if done.rows_affected() > 0 => {
                    counts.updated += 1;
                    debug!(table, id, from = %old, to = %new, "reference rewritten");
                }
                Ok(_) => debug!(table, id, "reference changed concurrently, left as is"),
                Err(err) => {
                    counts.errors += 1;
                    warn!(table, id, error = %err, reason = "row_update_failed", "reference update failed");
                }
            }
        }
        counts
    }
}

enum FileOutcome {
    Migrated(u64),
    Skipped,
}

/// Blocking directory walk; entries are visited in file-name order.
fn walk_category(root: &Path) -> Discovery {
    let mut discovery = Discovery::default();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let file = err
                    .path()
                    .and_then(|p| p.strip_prefix(root).ok())
                    .map(relative_string)
                    .unwrap_or_default();
                discovery
                    .errors
                    .push(ItemError::new(file, ItemFailure::WalkFailed).with_detail(err));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        discovery.files.push(LegacyFile {
            local_path: entry.path().to_path_buf(),
            relative_path: relative_string(relative),
            size: entry.metadata().map(|m| m.len()).unwrap_or(0),
        });
    }
    discovery
}

fn relative_string(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Content type recorded on migrated objects, by file extension.
fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "txt" => "text/plain",
        _ => return None,
    })
}

/// Persist `report` as `migration-report-<timestamp>.json` under `dir`.
pub async fn write_report(report: &MigrationReport, dir: &Path) -> Result<PathBuf, MigrationError> {
    fs::create_dir_all(dir).await?;
    let path = dir.join(format!(
        "migration-report-{}.json",
        report.finished_at.format("%Y-%m-%dT%H-%M-%S")
    ));
    let json = serde_json::to_vec_pretty(report).map_err(io::Error::from)?;
    fs::write(&path, json).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for(Path::new("a/B.PNG")), Some("image/png"));
        assert_eq!(content_type_for(Path::new("ata.pdf")), Some("application/pdf"));
        assert_eq!(content_type_for(Path::new("noext")), None);
        assert_eq!(content_type_for(Path::new("x.bin")), None);
    }

    #[test]
    fn walk_reports_relative_slash_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("2024/03")).unwrap();
        std::fs::write(dir.path().join("2024/03/ata.pdf"), b"pdf").unwrap();
        std::fs::write(dir.path().join("top.png"), b"png!").unwrap();

        let discovery = walk_category(dir.path());
        assert!(discovery.errors.is_empty());
        let rel: Vec<_> = discovery.files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(rel, vec!["2024/03/ata.pdf", "top.png"]);
        assert_eq!(discovery.files[1].size, 4);
    }

    #[test]
    fn reference_columns_cover_every_result_slot() {
        let mut results = ReferenceResults::default();
        for (i, column) in REFERENCE_COLUMNS.iter().enumerate() {
            (column.slot)(&mut results).updated = i + 1;
        }
        assert_eq!(results.users.updated, 1);
        assert_eq!(results.activities.updated, 2);
        assert_eq!(results.documents.updated, 3);
        assert_eq!(results.news.updated, 4);
        assert_eq!(results.total_updated(), 10);
    }
}
