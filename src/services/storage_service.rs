//! src/services/storage_service.rs
//!
//! Storage backends for file payloads. The service only talks to the
//! `StorageBackend` trait; `LocalDiskStorage` keeps payloads on local disk
//! sharded beneath `base_path/{shard}/{shard}/{id}`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
    pin::Pin,
};
use tempfile::TempPath;
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncRead, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage location `{0}`")]
    InvalidLocation(String),
    #[error("no payload stored at `{0}`")]
    NotFound(String),
    #[error("payload for `{0}` already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Incoming payload bytes.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// Readable handle on a stored payload.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Outcome of a completed write.
#[derive(Debug, Clone)]
pub struct StoredObject {
    /// Backend-relative location, to be kept in the file record.
    pub location: String,
    pub size_bytes: u64,
    /// MD5 of the payload, lowercase hex.
    pub etag: String,
}

/// Durable byte storage addressed by location.
///
/// Locations are produced by `write_stream` and are opaque to everything
/// outside the backend and the upload path.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write the whole stream to a fresh location derived from `id`.
    ///
    /// Either the payload is fully written and durable when this returns `Ok`,
    /// or nothing is left behind.
    async fn write_stream(&self, id: Uuid, stream: ByteStream<'_>) -> StorageResult<StoredObject>;

    /// Open a stored payload for reading; returns the reader and its length.
    async fn open(&self, location: &str) -> StorageResult<(ObjectReader, u64)>;

    /// Delete a stored payload. Missing payloads are not an error.
    async fn remove(&self, location: &str) -> StorageResult<()>;

    /// Verify the backend can currently write, read and delete.
    async fn check(&self) -> StorageResult<()>;
}

/// Payloads on the local filesystem.
#[derive(Clone, Debug)]
pub struct LocalDiskStorage {
    /// Base directory on disk where payloads are stored.
    base_path: PathBuf,
}

const MAX_LOCATION_LEN: usize = 1024;

impl LocalDiskStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Two-level shard directories for an id: the first two bytes of
    /// MD5(id) as lowercase hex. Keeps the file count per directory small.
    fn shards(id: &Uuid) -> (String, String) {
        let digest = md5::compute(id.as_bytes());
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Relative location for an id. Built only from the id, never from
    /// anything the client sent.
    fn location_for(id: &Uuid) -> String {
        let (shard_a, shard_b) = Self::shards(id);
        format!("{shard_a}/{shard_b}/{id}")
    }

    /// Resolve a location to a path under `base_path`, rejecting anything
    /// that could escape it.
    fn resolve(&self, location: &str) -> StorageResult<PathBuf> {
        let invalid = || StorageError::InvalidLocation(location.to_string());
        if location.is_empty() || location.len() > MAX_LOCATION_LEN {
            return Err(invalid());
        }
        if location
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\')
        {
            return Err(invalid());
        }
        let relative = Path::new(location);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(invalid());
        }
        Ok(self.base_path.join(relative))
    }
}

/// Remove empty directories from `start` up to (not including) `stop`.
/// Also called from `Drop`, hence blocking.
fn prune_empty_dirs(start: &Path, stop: &Path) {
    let mut current = start.to_path_buf();
    while current.starts_with(stop) && current != stop {
        match std::fs::remove_dir(&current) {
            Ok(_) => {
                if let Some(parent) = current.parent() {
                    current = parent.to_path_buf();
                } else {
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
            Err(err) => {
                debug!("failed to prune directory {}: {}", current.display(), err);
                break;
            }
        }
    }
}

/// A payload being written to a temporary file inside its shard directory.
///
/// Unless [`PendingWrite::persist`] succeeds, dropping it deletes the
/// temporary file and prunes shard directories left empty. This also covers
/// a write future that is dropped mid-stream.
struct PendingWrite {
    tmp: Option<TempPath>,
    parent: PathBuf,
    base: PathBuf,
    persisted: bool,
}

impl PendingWrite {
    async fn create(parent: PathBuf, base: &Path) -> io::Result<(Self, File)> {
        fs::create_dir_all(&parent).await?;
        let mut pending = Self {
            tmp: None,
            parent,
            base: base.to_path_buf(),
            persisted: false,
        };
        let (file, tmp) = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(&pending.parent)?
            .into_parts();
        pending.tmp = Some(tmp);
        Ok((pending, File::from_std(file)))
    }

    /// Move the temporary file to `dest`, failing if `dest` already exists.
    fn persist(mut self, dest: &Path) -> io::Result<()> {
        if let Some(tmp) = self.tmp.take() {
            if let Err(err) = tmp.persist_noclobber(dest) {
                self.tmp = Some(err.path);
                return Err(err.error);
            }
        }
        self.persisted = true;
        Ok(())
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        if let Some(tmp) = self.tmp.take() {
            if let Err(err) = tmp.close() {
                debug!("failed to remove temporary payload: {}", err);
            }
        }
        prune_empty_dirs(&self.parent, &self.base);
    }
}

#[async_trait]
impl StorageBackend for LocalDiskStorage {
    /// Stream to a temporary file next to the destination, fsync, then move it
    /// into place. On failure or cancellation the temporary file and any
    /// emptied shard directories are removed.
    async fn write_stream(
        &self,
        id: Uuid,
        mut stream: ByteStream<'_>,
    ) -> StorageResult<StoredObject> {
        let location = Self::location_for(&id);
        let file_path = self.resolve(&location)?;
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "payload path missing parent directory",
            ))
        })?;
        if fs::try_exists(&file_path).await? {
            return Err(StorageError::AlreadyExists(location));
        }

        let (pending, mut file) = PendingWrite::create(parent, &self.base_path).await?;
        let mut size_bytes: u64 = 0;
        let mut digest = Context::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            size_bytes += chunk.len() as u64;
            digest.consume(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        pending.persist(&file_path).map_err(|err| {
            if err.kind() == ErrorKind::AlreadyExists {
                StorageError::AlreadyExists(location.clone())
            } else {
                StorageError::Io(err)
            }
        })?;
        debug!("stored {} bytes at {}", size_bytes, file_path.display());

        Ok(StoredObject {
            location,
            size_bytes,
            etag: format!("{:x}", digest.compute()),
        })
    }

    async fn open(&self, location: &str) -> StorageResult<(ObjectReader, u64)> {
        let file_path = self.resolve(location)?;
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::NotFound(location.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        let len = file.metadata().await?.len();
        Ok((Box::pin(file), len))
    }

    async fn remove(&self, location: &str) -> StorageResult<()> {
        let file_path = self.resolve(location)?;
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            prune_empty_dirs(parent, &self.base_path);
        }
        Ok(())
    }

    /// Write, read back and delete a probe file under `base_path`.
    async fn check(&self) -> StorageResult<()> {
        let probe = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&probe, b"readyz").await?;
        let read_back = fs::read(&probe).await;
        let _ = fs::remove_file(&probe).await;
        if read_back? != b"readyz" {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "probe file content mismatch",
            )));
        }
        Ok(())
    }
}
