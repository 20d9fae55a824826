//! src/services/file_service.rs
//!
//! FileService — uploads, listing and downloads on top of the registry and a
//! storage backend. This is the state shared by every HTTP handler.
//!
//! Uploads are staged: each file in a batch is written to storage on its own,
//! and only once the whole request has been read are the successful ones
//! published to the registry together.

use crate::{
    models::file::{FileRecord, FileSummary},
    services::{
        id_generator::IdGenerator,
        registry::{FileRegistry, RegistryError},
        storage_service::{ByteStream, ObjectReader, StorageBackend, StorageError},
    },
};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Display names longer than this are truncated.
const MAX_FILENAME_CHARS: usize = 255;
const FALLBACK_FILENAME: &str = "file";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no files provided")]
    NoFiles,
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error("none of the {0} uploaded files could be stored")]
    NothingStored(usize),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// A file in a batch that could not be stored.
#[derive(Debug)]
pub struct ItemFailure {
    pub filename: String,
    pub error: StorageError,
}

/// Result of storing one file of a batch.
pub type ItemOutcome = Result<FileRecord, ItemFailure>;

#[derive(Clone)]
pub struct FileService {
    registry: FileRegistry,
    storage: Arc<dyn StorageBackend>,
    ids: Arc<dyn IdGenerator>,
    /// Base URL clients use to reach this service, without trailing slash.
    public_url: String,
    max_upload_bytes: usize,
}

impl FileService {
    pub fn new(
        registry: FileRegistry,
        storage: Arc<dyn StorageBackend>,
        ids: Arc<dyn IdGenerator>,
        public_url: impl Into<String>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            registry,
            storage,
            ids,
            public_url: public_url.into().trim_end_matches('/').to_string(),
            max_upload_bytes,
        }
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    pub fn storage(&self) -> &dyn StorageBackend {
        self.storage.as_ref()
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Public download URL for an id. Derived on every call so a changed
    /// public address never leaves stale URLs behind.
    pub fn download_url(&self, id: &Uuid) -> String {
        format!("{}/api/v1/files/download/{}", self.public_url, id)
    }

    pub fn summarize(&self, record: &FileRecord) -> FileSummary {
        FileSummary::new(record, self.download_url(&record.id))
    }

    /// Start a new upload batch.
    pub fn begin_upload(&self) -> UploadBatch {
        UploadBatch {
            service: self.clone(),
            outcomes: Vec::new(),
        }
    }

    /// Summaries of every registered file.
    pub async fn list_files(&self) -> Vec<FileSummary> {
        self.registry
            .list()
            .await
            .iter()
            .map(|record| self.summarize(record))
            .collect()
    }

    /// Resolve an id to its record and an open reader on its payload.
    ///
    /// Unknown and unparseable ids are both `NotFound`. A registered record
    /// whose payload is gone is a storage fault, not a miss.
    pub async fn open_download(&self, raw_id: &str) -> ServiceResult<(FileRecord, ObjectReader)> {
        let not_found = || ServiceError::NotFound(raw_id.to_string());
        let id = Uuid::parse_str(raw_id).map_err(|_| not_found())?;
        let record = self.registry.get(&id).await.ok_or_else(not_found)?;
        let (reader, _) = self.storage.open(&record.storage_location).await?;
        Ok((record, reader))
    }

    /// Write one file to storage. Nothing is registered here.
    async fn store_one(
        &self,
        raw_filename: &str,
        content_type: Option<String>,
        stream: ByteStream<'_>,
    ) -> ItemOutcome {
        let filename = sanitize_filename(raw_filename);
        let id = self.ids.generate();
        let stored = self
            .storage
            .write_stream(id, stream)
            .await
            .map_err(|error| ItemFailure {
                filename: filename.clone(),
                error,
            })?;

        let now = Utc::now();
        Ok(FileRecord {
            id,
            filename,
            storage_location: stored.location,
            content_type,
            size_bytes: stored.size_bytes,
            etag: stored.etag,
            uploaded_at: now,
            updated_at: now,
        })
    }

    /// Best-effort removal of staged payloads that will never be registered.
    async fn discard(&self, records: &[FileRecord]) {
        for record in records {
            if let Err(err) = self.storage.remove(&record.storage_location).await {
                warn!(id = %record.id, "failed to remove staged payload: {}", err);
            }
        }
    }
}

/// Files of one upload request, written to storage but not yet visible.
///
/// Every file is stored independently; a failure only drops that file. The
/// batch is finished with [`UploadBatch::commit`] or [`UploadBatch::abort`].
/// A batch dropped unfinished, e.g. when the client disconnects mid-request,
/// removes its staged payloads in a background task.
pub struct UploadBatch {
    service: FileService,
    outcomes: Vec<ItemOutcome>,
}

impl UploadBatch {
    /// Store one file of the batch. Failures are logged and kept as outcomes.
    pub async fn add(
        &mut self,
        filename: &str,
        content_type: Option<String>,
        stream: ByteStream<'_>,
    ) {
        let outcome = self.service.store_one(filename, content_type, stream).await;
        match &outcome {
            Ok(record) => debug!(id = %record.id, size = record.size_bytes, "staged upload"),
            Err(failure) => warn!(
                filename = %failure.filename,
                "skipping file that could not be stored: {}",
                failure.error
            ),
        }
        self.outcomes.push(outcome);
    }

    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    /// Publish the batch.
    ///
    /// Policy: failed items are omitted and never abort the batch. An empty
    /// batch is `NoFiles`; a batch where every item failed is `NothingStored`.
    /// Successful items are registered in one atomic step, so if any id is
    /// already taken nothing is registered and the staged bytes are removed.
    pub async fn commit(mut self) -> ServiceResult<Vec<FileSummary>> {
        let attempted = self.outcomes.len();
        if attempted == 0 {
            return Err(ServiceError::NoFiles);
        }

        let records: Vec<FileRecord> = self
            .outcomes
            .iter()
            .filter_map(|outcome| outcome.as_ref().ok())
            .cloned()
            .collect();
        if records.is_empty() {
            error!("all {} files of the upload failed to store", attempted);
            return Err(ServiceError::NothingStored(attempted));
        }

        let summaries: Vec<FileSummary> = records
            .iter()
            .map(|record| self.service.summarize(record))
            .collect();

        // Outcomes stay until registration settles; a dropped commit is left to `Drop`.
        let registered = self.service.registry.put_all(records.clone()).await;
        self.outcomes.clear();
        if let Err(err) = registered {
            error!("failed to register upload batch: {}", err);
            self.service.discard(&records).await;
            return Err(err.into());
        }

        info!(
            "registered {} of {} uploaded files",
            summaries.len(),
            attempted
        );
        Ok(summaries)
    }

    /// Drop the batch, deleting every staged payload.
    pub async fn abort(mut self) {
        let records = self.take_staged();
        if !records.is_empty() {
            debug!("discarding {} staged files", records.len());
        }
        self.service.discard(&records).await;
    }

    /// Successful items, leaving nothing for `Drop` to clean up.
    fn take_staged(&mut self) -> Vec<FileRecord> {
        std::mem::take(&mut self.outcomes)
            .into_iter()
            .filter_map(Result::ok)
            .collect()
    }
}

impl Drop for UploadBatch {
    fn drop(&mut self) {
        let records = self.take_staged();
        if records.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no runtime to remove {} abandoned staged files", records.len());
            return;
        };
        debug!("upload abandoned, discarding {} staged files", records.len());
        let service = self.service.clone();
        runtime.spawn(async move {
            service.discard(&records).await;
        });
    }
}

/// Reduce a client-supplied filename to a safe display name.
///
/// Only the last path component is kept, control characters are dropped and
/// double quotes become single quotes so the name can sit inside a quoted
/// header parameter. Empty, `.` and `..` names become `file`.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if c == '"' { '\'' } else { c })
        .take(MAX_FILENAME_CHARS)
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        FALLBACK_FILENAME.to_string()
    } else {
        cleaned.to_string()
    }
}
