//! src/services/backend.rs
//!
//! The backing object store behind every upload, policy write and download.
//!
//! `ObjectBackend` is the seam: the rest of the crate never talks to disk or
//! to a cloud SDK directly. `LocalObjectBackend` keeps payloads on local disk
//! sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}` and object rows
//! plus metadata in SQLite. It signs its own upload URLs with HMAC-SHA256 and
//! serves them from the `/storage/...` route.

use crate::{
    models::{metadata::ObjectMetadata, object::StoredObject},
    services::{
        credentials::{CredentialError, CredentialProvider, SigningKey},
        path_codec::{CloudPath, parse_cloud_path},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, pin_mut, stream};
use hmac::{Hmac, Mac};
use md5::Context;
use sha2::Sha256;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::OnceCell,
};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Route under which `LocalObjectBackend` accepts signed uploads.
pub const SIGNED_UPLOAD_ROUTE: &str = "/storage/";

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Streamed object payload.
pub type ObjectBody = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("object `{key}` already exists in bucket `{bucket}`")]
    ObjectExists { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("upload signature is invalid")]
    InvalidSignature,
    #[error("upload URL expired at {0}")]
    UploadExpired(DateTime<Utc>),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Operations the storage layer needs from a backing object store.
///
/// Implementations must be safe to share across concurrent requests.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Cheap reachability check used at batch start and by `/readyz`.
    async fn ping(&self) -> BackendResult<()>;

    async fn exists(&self, bucket: &str, key: &str) -> BackendResult<bool>;

    /// Write (or overwrite) an object in one call.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        data: Bytes,
    ) -> BackendResult<StoredObject>;

    /// Object row plus a stream over its payload.
    async fn open_object(&self, bucket: &str, key: &str)
    -> BackendResult<(StoredObject, ObjectBody)>;

    /// Upsert one metadata entry on an existing object.
    async fn set_metadata(
        &self,
        bucket: &str,
        key: &str,
        meta_key: &str,
        value: &str,
    ) -> BackendResult<()>;

    async fn get_metadata(
        &self,
        bucket: &str,
        key: &str,
        meta_key: &str,
    ) -> BackendResult<Option<String>>;

    /// Signed URL granting a single `PUT` of exactly `bucket/key` until `expires_at`.
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> BackendResult<String>;

    /// Recover the cloud path a URL from [`presign_put`](Self::presign_put) points at.
    fn resolve_upload_url(&self, url: &str) -> Option<CloudPath>;
}

/// Disk + SQLite implementation of [`ObjectBackend`].
#[derive(Clone)]
pub struct LocalObjectBackend {
    /// Shared SQLite connection pool used for object rows and metadata.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Externally reachable origin prefixed to signed upload URLs.
    public_base_url: String,

    credentials: Arc<dyn CredentialProvider>,

    /// Established on first signing, then reused for the life of the process.
    signing_key: Arc<OnceCell<SigningKey>>,
}

impl LocalObjectBackend {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            credentials,
            signing_key: Arc::new(OnceCell::new()),
        }
    }

    /// Reject empty, oversized, absolute, traversing or control-character keys.
    fn ensure_key_safe(&self, key: &str) -> BackendResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(BackendError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.split('/').any(|seg| seg.is_empty() || seg == "..") {
            return Err(BackendError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(BackendError::InvalidObjectKey);
        }
        Ok(())
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Two-level shard identifiers from MD5(bucket/key), keeping directories small.
    fn object_shards(bucket: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, key);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_object(&self, bucket: &str, key: &str) -> BackendResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT id, bucket, key, content_type, size_bytes, etag, last_modified
             FROM objects WHERE bucket = ? AND key = ?",
        )
        .bind(bucket)
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => BackendError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => BackendError::Sqlx(other),
        })
    }

    async fn signing_key(&self) -> BackendResult<&SigningKey> {
        let key = self
            .signing_key
            .get_or_try_init(|| async { self.credentials.signing_key().await })
            .await?;
        Ok(key)
    }

    fn mac(
        key: &SigningKey,
        bucket: &str,
        object_key: &str,
        expires: i64,
    ) -> BackendResult<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
            .map_err(|_| BackendError::InvalidSignature)?;
        mac.update(format!("PUT\n{bucket}\n{object_key}\n{expires}").as_bytes());
        Ok(mac)
    }

    /// Check signature, expiry and write-once for a signed `PUT`.
    pub async fn verify_signed_put(
        &self,
        bucket: &str,
        key: &str,
        expires: i64,
        signature: &str,
    ) -> BackendResult<()> {
        self.ensure_key_safe(key)?;
        let provided = hex::decode(signature).map_err(|_| BackendError::InvalidSignature)?;
        let signing_key = self.signing_key().await?;
        Self::mac(signing_key, bucket, key, expires)?
            .verify_slice(&provided)
            .map_err(|_| BackendError::InvalidSignature)?;

        let expires_at =
            DateTime::<Utc>::from_timestamp(expires, 0).ok_or(BackendError::InvalidSignature)?;
        if Utc::now() > expires_at {
            return Err(BackendError::UploadExpired(expires_at));
        }

        if self.exists(bucket, key).await? {
            return Err(BackendError::ObjectExists {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Stream-upload an object to disk and upsert its row.
    ///
    /// Bytes go to a temporary file first (MD5 and size computed on the fly),
    /// are fsynced, then renamed into place. Overwrites keep the row id, so
    /// metadata already attached to the object survives.
    pub async fn upload_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        stream: S,
    ) -> BackendResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let staged = self.stage_payload(bucket, key, stream).await?;
        if let Err(err) = fs::rename(&staged.tmp_path, &staged.file_path).await {
            let _ = fs::remove_file(&staged.tmp_path).await;
            return Err(BackendError::Io(err));
        }

        let object = sqlx::query_as::<_, StoredObject>(
            r#"
            INSERT INTO objects (id, bucket, key, content_type, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, bucket, key, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(bucket)
        .bind(key)
        .bind(content_type)
        .bind(staged.size_bytes)
        .bind(&staged.etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        tracing::debug!(bucket, key, size_bytes = staged.size_bytes, etag = %staged.etag, "stored object");
        Ok(object)
    }

    /// Write-once variant of [`upload_object_stream`](Self::upload_object_stream).
    ///
    /// The row is claimed with a plain `INSERT` before the payload is moved
    /// into place, so of two concurrent writers only one lands; the other gets
    /// `ObjectExists` and its staged bytes are discarded.
    pub async fn create_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        stream: S,
    ) -> BackendResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let staged = self.stage_payload(bucket, key, stream).await?;

        let inserted = sqlx::query_as::<_, StoredObject>(
            r#"
            INSERT INTO objects (id, bucket, key, content_type, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id, bucket, key, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(bucket)
        .bind(key)
        .bind(content_type)
        .bind(staged.size_bytes)
        .bind(&staged.etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        let object = match inserted {
            Ok(object) => object,
            Err(err) => {
                let _ = fs::remove_file(&staged.tmp_path).await;
                return Err(match err {
                    sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                        BackendError::ObjectExists {
                            bucket: bucket.to_string(),
                            key: key.to_string(),
                        }
                    }
                    other => BackendError::Sqlx(other),
                });
            }
        };

        if let Err(err) = fs::rename(&staged.tmp_path, &staged.file_path).await {
            let _ = fs::remove_file(&staged.tmp_path).await;
            let _ = sqlx::query("DELETE FROM objects WHERE id = ?")
                .bind(&object.id)
                .execute(&*self.db)
                .await;
            return Err(BackendError::Io(err));
        }

        tracing::debug!(bucket, key, size_bytes = staged.size_bytes, etag = %staged.etag, "created object");
        Ok(object)
    }

    /// Stream the payload into a fsynced temporary file beside its final location.
    async fn stage_payload<S>(&self, bucket: &str, key: &str, stream: S) -> BackendResult<StagedPayload>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.ensure_key_safe(key)?;

        let file_path = self.object_path(bucket, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            BackendError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(BackendError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(BackendError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BackendError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BackendError::Io(err));
        }
        drop(file);

        Ok(StagedPayload {
            tmp_path,
            file_path,
            size_bytes,
            etag: format!("{:x}", digest.compute()),
        })
    }
}

/// Payload written to a temporary file, not yet visible under its key.
struct StagedPayload {
    tmp_path: PathBuf,
    file_path: PathBuf,
    size_bytes: i64,
    etag: String,
}

#[async_trait]
impl ObjectBackend for LocalObjectBackend {
    async fn ping(&self) -> BackendResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> BackendResult<bool> {
        match self.fetch_object(bucket, key).await {
            Ok(_) => Ok(true),
            Err(BackendError::ObjectNotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<String>,
        data: Bytes,
    ) -> BackendResult<StoredObject> {
        let body = stream::once(async move { Ok::<_, io::Error>(data) });
        self.upload_object_stream(bucket, key, content_type, body)
            .await
    }

    async fn open_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> BackendResult<(StoredObject, ObjectBody)> {
        self.ensure_key_safe(key)?;
        let object = self.fetch_object(bucket, key).await?;
        let file = File::open(self.object_path(bucket, key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    BackendError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    BackendError::Io(err)
                }
            })?;
        Ok((object, Box::pin(ReaderStream::new(file))))
    }

    async fn set_metadata(
        &self,
        bucket: &str,
        key: &str,
        meta_key: &str,
        value: &str,
    ) -> BackendResult<()> {
        let object = self.fetch_object(bucket, key).await?;
        sqlx::query(
            "INSERT INTO object_metadata (object_id, key, value) VALUES (?, ?, ?)
             ON CONFLICT(object_id, key) DO UPDATE SET value = excluded.value",
        )
        .bind(&object.id)
        .bind(meta_key)
        .bind(value)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn get_metadata(
        &self,
        bucket: &str,
        key: &str,
        meta_key: &str,
    ) -> BackendResult<Option<String>> {
        let object = self.fetch_object(bucket, key).await?;
        let entry = sqlx::query_as::<_, ObjectMetadata>(
            "SELECT object_id, key, value FROM object_metadata WHERE object_id = ? AND key = ?",
        )
        .bind(&object.id)
        .bind(meta_key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(entry.map(|m| m.value))
    }

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        expires_at: DateTime<Utc>,
    ) -> BackendResult<String> {
        self.ensure_key_safe(key)?;
        let expires = expires_at.timestamp();
        let signing_key = self.signing_key().await?;
        let signature = hex::encode(
            Self::mac(signing_key, bucket, key, expires)?
                .finalize()
                .into_bytes(),
        );
        Ok(format!(
            "{}{}{}/{}?expires={}&signature={}",
            self.public_base_url, SIGNED_UPLOAD_ROUTE, bucket, key, expires, signature
        ))
    }

    fn resolve_upload_url(&self, url: &str) -> Option<CloudPath> {
        let without_query = url.split(['?', '#']).next().unwrap_or(url);
        let path = match without_query.strip_prefix(&self.public_base_url) {
            Some(path) => path,
            None if without_query.starts_with('/') => without_query,
            None => return None,
        };
        let rest = path.strip_prefix(SIGNED_UPLOAD_ROUTE)?;
        parse_cloud_path(rest).ok()
    }
}
