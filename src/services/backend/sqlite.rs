//! SqliteBackend — wire metadata in SQLite, object payloads on local disk
//! sharded beneath `base_path/{shard}/{shard}/{md5(key)}-{version}`.
//!
//! Every version gets its own payload file. The new file is written (temp
//! file, fsync, rename) before the row is upserted, and the previous version's
//! file is only removed once the row has committed. A failed overwrite
//! therefore leaves the previous object readable.

use super::{BackendResult, StorageBackend};
use crate::models::object::{RawRecord, WireMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../../migrations/0001_init.sql");

#[derive(Clone, Debug)]
pub struct SqliteBackend {
    /// Shared SQLite connection pool used for metadata operations.
    db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    base_path: PathBuf,
}

impl SqliteBackend {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Open a pool for `database_url`, creating the SQLite file, its parent
    /// directory and `base_path` when missing.
    pub async fn connect(
        database_url: &str,
        base_path: impl Into<PathBuf>,
        max_connections: u32,
    ) -> BackendResult<Self> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).await?;
            info!("Created storage directory at {}", base_path.display());
        }

        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:")
            .trim_start_matches("file:");
        let in_memory = db_path.starts_with(":memory:");
        if !in_memory {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent).await?;
                    info!("Created missing directory {:?}", parent);
                }
            }
            // SQLx will not create the database file on its own.
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(db_path)
                .await?;
        }
        debug!("Connecting to SQLite at {}", database_url);

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections })
            .connect(database_url)
            .await?;
        Ok(Self::new(Arc::new(pool), base_path))
    }

    /// Apply the embedded schema. Idempotent.
    pub async fn migrate(&self) -> BackendResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Generate two-level shard identifiers plus the file name for one
    /// version of a key.
    ///
    /// Uses MD5(key); the first two bytes become lowercase hex directory names
    /// (00–ff) to keep the file count per directory small. All versions of a
    /// key share a shard directory.
    fn object_path(&self, key: &str, version: &str) -> PathBuf {
        let digest = md5::compute(key.as_bytes());
        let mut path = self.base_path.clone();
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        if version.is_empty() {
            path.push(format!("{:x}", digest));
        } else {
            path.push(format!("{:x}-{}", digest, version));
        }
        path
    }

    /// Upsert the row for `key` in one transaction. Returns the version it
    /// replaced, if any.
    async fn upsert(&self, key: &str, metadata: &WireMetadata) -> BackendResult<Option<String>> {
        let metadata_json = serde_json::to_string(metadata)?;
        let mut tx = self.db.begin().await?;
        let previous =
            sqlx::query_scalar::<_, String>("SELECT version FROM objects WHERE key = ?")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;
        sqlx::query(
            r#"
            INSERT INTO objects (key, version, size_bytes, etag, uploaded, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                version = excluded.version,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                uploaded = excluded.uploaded,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(key)
        .bind(&metadata.version)
        .bind(metadata.size as i64)
        .bind(&metadata.etag)
        .bind(&metadata.uploaded)
        .bind(&metadata_json)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(previous)
    }

    async fn remove_payload(&self, file_path: &Path) -> BackendResult<()> {
        match fs::remove_file(file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(err.into()),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    async fn fetch_metadata(&self, key: &str) -> BackendResult<Option<WireMetadata>> {
        let row = sqlx::query_scalar::<_, String>("SELECT metadata_json FROM objects WHERE key = ?")
            .bind(key)
            .fetch_optional(&*self.db)
            .await?;
        match row {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Write `value` to a temp file beside `file_path`, fsync it and rename it
    /// into place. The temp file is removed on any failure.
    async fn write_payload(&self, file_path: &Path, value: &[u8]) -> io::Result<()> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            io::Error::new(ErrorKind::Other, "object path missing parent directory")
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let result = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(value).await?;
            file.flush().await?;
            file.sync_all().await?;
            match fs::rename(&tmp_path, file_path).await {
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    fs::remove_file(file_path).await?;
                    fs::rename(&tmp_path, file_path).await
                }
                other => other,
            }
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path).await;
        }
        result
    }

    /// Recursively remove empty directories up to `base_path`.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn head(&self, key: &str) -> BackendResult<Option<RawRecord>> {
        Ok(self.fetch_metadata(key).await?.map(|metadata| RawRecord {
            value: None,
            metadata: Some(metadata),
        }))
    }

    async fn get(&self, key: &str) -> BackendResult<Option<RawRecord>> {
        let Some(metadata) = self.fetch_metadata(key).await? else {
            return Ok(None);
        };
        let file_path = self.object_path(key, &metadata.version);
        match fs::read(&file_path).await {
            Ok(bytes) => Ok(Some(RawRecord {
                value: Some(Bytes::from(bytes)),
                metadata: Some(metadata),
            })),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} missing for key {:?}", file_path.display(), key);
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, key: &str, value: Bytes, metadata: WireMetadata) -> BackendResult<RawRecord> {
        let file_path = self.object_path(key, &metadata.version);
        self.write_payload(&file_path, &value).await?;

        let previous = match self.upsert(key, &metadata).await {
            Ok(previous) => previous,
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                return Err(err);
            }
        };

        if let Some(previous) = previous.filter(|v| *v != metadata.version) {
            let old_path = self.object_path(key, &previous);
            if let Err(err) = fs::remove_file(&old_path).await {
                if err.kind() != ErrorKind::NotFound {
                    warn!("failed to remove superseded payload {}: {}", old_path.display(), err);
                }
            }
        }

        Ok(RawRecord {
            value: Some(value),
            metadata: Some(metadata),
        })
    }

    async fn delete(&self, key: &str) -> BackendResult<bool> {
        let removed =
            sqlx::query_scalar::<_, String>("DELETE FROM objects WHERE key = ? RETURNING version")
                .bind(key)
                .fetch_optional(&*self.db)
                .await?;
        let Some(version) = removed else {
            return Ok(false);
        };
        self.remove_payload(&self.object_path(key, &version)).await?;
        Ok(true)
    }

    /// Runs `SELECT 1` and a write/read/delete round trip under `base_path`.
    async fn ping(&self) -> BackendResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;

        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read? != b"readyz" {
            return Err(io::Error::new(ErrorKind::Other, "file content mismatch").into());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn backend() -> (SqliteBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = SqliteBackend::connect("sqlite::memory:", dir.path().join("objects"), 5)
            .await
            .unwrap();
        backend.migrate().await.unwrap();
        (backend, dir)
    }

    fn wire(key: &str, etag: &str, size: u64) -> WireMetadata {
        WireMetadata {
            key: key.into(),
            version: Uuid::new_v4().simple().to_string(),
            size,
            etag: etag.into(),
            http_etag: format!("\"{}\"", etag),
            uploaded: "2024-01-01T00:00:00Z".into(),
            http_metadata: Default::default(),
            custom_metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn put_head_get_round_trip() {
        let (backend, _dir) = backend().await;
        let meta = wire("photos/a.jpg", "e1", 5);
        backend
            .put("photos/a.jpg", Bytes::from_static(b"hello"), meta.clone())
            .await
            .unwrap();

        let head = backend.head("photos/a.jpg").await.unwrap().unwrap();
        assert!(head.value.is_none());
        assert_eq!(head.metadata, Some(meta.clone()));

        let got = backend.get("photos/a.jpg").await.unwrap().unwrap();
        assert_eq!(got.value, Some(Bytes::from_static(b"hello")));
        assert_eq!(got.metadata, Some(meta));
    }

    #[tokio::test]
    async fn put_overwrites_existing_key() {
        let (backend, _dir) = backend().await;
        backend
            .put("k", Bytes::from_static(b"one"), wire("k", "e1", 3))
            .await
            .unwrap();
        backend
            .put("k", Bytes::from_static(b"second"), wire("k", "e2", 6))
            .await
            .unwrap();
        let got = backend.get("k").await.unwrap().unwrap();
        assert_eq!(got.value, Some(Bytes::from_static(b"second")));
        assert_eq!(got.metadata.unwrap().etag, "e2");
    }

    #[tokio::test]
    async fn overwrite_removes_superseded_payload() {
        let (backend, _dir) = backend().await;
        let first = wire("k", "e1", 3);
        let second = wire("k", "e2", 6);
        backend
            .put("k", Bytes::from_static(b"one"), first.clone())
            .await
            .unwrap();
        backend
            .put("k", Bytes::from_static(b"second"), second.clone())
            .await
            .unwrap();
        assert!(!backend.object_path("k", &first.version).exists());
        assert!(backend.object_path("k", &second.version).exists());
    }

    #[tokio::test]
    async fn failed_overwrite_keeps_previous_object() {
        let (backend, _dir) = backend().await;
        let first = wire("k", "e1", 3);
        backend
            .put("k", Bytes::from_static(b"old"), first.clone())
            .await
            .unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_update BEFORE UPDATE ON objects \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(&*backend.db)
        .await
        .unwrap();

        let second = wire("k", "e2", 3);
        assert!(
            backend
                .put("k", Bytes::from_static(b"new"), second.clone())
                .await
                .is_err()
        );

        let got = backend.get("k").await.unwrap().unwrap();
        assert_eq!(got.value, Some(Bytes::from_static(b"old")));
        assert_eq!(got.metadata, Some(first));
        assert!(!backend.object_path("k", &second.version).exists());
    }

    #[tokio::test]
    async fn missing_payload_reads_as_absent() {
        let (backend, _dir) = backend().await;
        let meta = wire("k", "e1", 3);
        backend
            .put("k", Bytes::from_static(b"one"), meta.clone())
            .await
            .unwrap();
        fs::remove_file(backend.object_path("k", &meta.version)).await.unwrap();
        assert!(backend.head("k").await.unwrap().is_some());
        assert!(backend.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_row_file_and_empty_shards() {
        let (backend, _dir) = backend().await;
        let meta = wire("k", "e1", 3);
        backend
            .put("k", Bytes::from_static(b"one"), meta.clone())
            .await
            .unwrap();
        let path = backend.object_path("k", &meta.version);
        assert!(backend.delete("k").await.unwrap());
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
        assert!(backend.base_path.exists());
        assert!(!backend.delete("k").await.unwrap());
        assert!(backend.head("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keys_with_path_segments_stay_under_base() {
        let (backend, _dir) = backend().await;
        let path = backend.object_path("../../etc/passwd", "v1");
        assert!(path.starts_with(&backend.base_path));
        assert_eq!(path.components().count(), backend.base_path.components().count() + 3);
    }

    #[tokio::test]
    async fn ping_checks_database_and_disk() {
        let (backend, _dir) = backend().await;
        backend.ping().await.unwrap();
    }
}
