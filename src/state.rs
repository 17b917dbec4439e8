//! Shared state handed to every handler.

use crate::services::{
    acl::AclStore,
    backend::{LocalObjectBackend, ObjectBackend},
    credentials::CredentialProvider,
    diagnostics::ReferenceDiagnostics,
    migration::MigrationEngine,
    path_codec::PathCodec,
    upload_sessions::UploadSessionIssuer,
};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub codec: Arc<PathCodec>,
    /// Concrete store: the signed-PUT route needs its verification helpers.
    pub store: Arc<LocalObjectBackend>,
    pub backend: Arc<dyn ObjectBackend>,
    pub acl: AclStore,
    pub issuer: UploadSessionIssuer,
    pub uploads_dir: PathBuf,
}

/// Inputs for [`AppState::new`] that do not come from the database.
pub struct StateOptions {
    pub bucket: String,
    pub storage_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub public_base_url: String,
    pub upload_ttl_secs: u64,
}

impl AppState {
    pub fn new(
        db: Arc<SqlitePool>,
        credentials: Arc<dyn CredentialProvider>,
        options: StateOptions,
    ) -> Self {
        let codec = Arc::new(PathCodec::new(options.bucket));
        let store = Arc::new(LocalObjectBackend::new(
            db.clone(),
            options.storage_dir,
            options.public_base_url,
            credentials,
        ));
        let backend: Arc<dyn ObjectBackend> = store.clone();
        Self {
            acl: AclStore::new(backend.clone()),
            issuer: UploadSessionIssuer::new(codec.clone(), backend.clone(), options.upload_ttl_secs),
            db,
            codec,
            store,
            backend,
            uploads_dir: options.uploads_dir,
        }
    }

    /// Migration engine over this state's store and database.
    pub fn migration_engine(&self) -> MigrationEngine {
        MigrationEngine::new(
            self.codec.clone(),
            self.backend.clone(),
            self.db.clone(),
            self.uploads_dir.clone(),
        )
    }

    /// Reference-integrity checks over this state's store and database.
    pub fn diagnostics(&self) -> ReferenceDiagnostics {
        ReferenceDiagnostics::new(self.codec.clone(), self.backend.clone(), self.db.clone())
    }
}
