//! Represents a file stored by the service and its public summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata for one file whose bytes are durably stored.
///
/// A `FileRecord` only exists once its payload has been fully written, and it
/// is never modified after it has been registered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    /// Random identifier; the only external reference to the file.
    pub id: Uuid,

    /// Sanitized client-supplied name. Display only.
    pub filename: String,

    /// Backend-relative address of the payload. Never sent to clients.
    pub storage_location: String,

    /// Content type declared by the uploading client, if any.
    pub content_type: Option<String>,

    /// Number of bytes actually written.
    pub size_bytes: u64,

    /// MD5 checksum of the payload, lowercase hex.
    pub etag: String,

    /// When the upload completed.
    pub uploaded_at: DateTime<Utc>,

    /// Last modification; equal to `uploaded_at` since records are immutable.
    pub updated_at: DateTime<Utc>,
}

/// Public-facing view of a [`FileRecord`], as returned by upload and list.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileSummary {
    pub id: Uuid,
    pub filename: String,
    pub size: u64,
    pub url: String,
}

impl FileSummary {
    pub fn new(record: &FileRecord, url: String) -> Self {
        Self {
            id: record.id,
            filename: record.filename.clone(),
            size: record.size_bytes,
            url,
        }
    }
}
