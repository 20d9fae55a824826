//! Shared helpers for unit tests.

use crate::services::{
    id_generator::IdGenerator,
    storage_service::{
        ByteStream, ObjectReader, StorageBackend, StorageError, StorageResult, StoredObject,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::{
    collections::VecDeque,
    io,
    path::Path,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use uuid::Uuid;

pub fn bytes_stream(content: &'static str) -> ByteStream<'static> {
    stream::iter(vec![Ok(Bytes::from_static(content.as_bytes()))]).boxed()
}

/// A stream that errors before yielding any bytes.
pub fn failing_stream() -> ByteStream<'static> {
    stream::iter(vec![Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "stream could not be opened",
    ))])
    .boxed()
}

/// Hands out the given ids in order, then random ones.
pub struct FixedIdGenerator {
    ids: Mutex<VecDeque<Uuid>>,
}

impl FixedIdGenerator {
    pub fn new(ids: Vec<Uuid>) -> Self {
        Self {
            ids: Mutex::new(ids.into()),
        }
    }
}

impl IdGenerator for FixedIdGenerator {
    fn generate(&self) -> Uuid {
        self.ids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(Uuid::new_v4)
    }
}

/// Wraps a backend and fails selected `write_stream` calls (1-based).
pub struct FailingStorage<S> {
    inner: S,
    fail_on: Vec<usize>,
    fail_all: bool,
    calls: AtomicUsize,
}

impl<S> FailingStorage<S> {
    pub fn failing_calls(inner: S, calls: &[usize]) -> Self {
        Self {
            inner,
            fail_on: calls.to_vec(),
            fail_all: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(inner: S) -> Self {
        Self {
            inner,
            fail_on: Vec::new(),
            fail_all: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<S: StorageBackend> StorageBackend for FailingStorage<S> {
    async fn write_stream(
        &self,
        id: Uuid,
        stream: ByteStream<'_>,
    ) -> StorageResult<StoredObject> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_all || self.fail_on.contains(&call) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "destination could not be created",
            )));
        }
        self.inner.write_stream(id, stream).await
    }

    async fn open(&self, location: &str) -> StorageResult<(ObjectReader, u64)> {
        self.inner.open(location).await
    }

    async fn remove(&self, location: &str) -> StorageResult<()> {
        self.inner.remove(location).await
    }

    async fn check(&self) -> StorageResult<()> {
        if self.fail_all {
            return Err(StorageError::Io(io::Error::other("backend offline")));
        }
        self.inner.check().await
    }
}

/// Build a `multipart/form-data` body. Each part is
/// `(field name, optional filename, content)`.
pub fn multipart_body(parts: &[(&str, Option<&str>, &str)]) -> (String, Vec<u8>) {
    let boundary = "filedrop-test-boundary";
    let mut body = Vec::new();
    for (name, filename, content) in parts {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        let disposition = match filename {
            Some(filename) => format!("form-data; name=\"{name}\"; filename=\"{filename}\""),
            None => format!("form-data; name=\"{name}\""),
        };
        body.extend_from_slice(format!("Content-Disposition: {disposition}\r\n").as_bytes());
        if filename.is_some() {
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(content.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

/// Wait for background cleanup to empty `dir`. False if it never does.
pub async fn wait_until_empty(dir: &Path) -> bool {
    for _ in 0..50 {
        let empty = std::fs::read_dir(dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if empty {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
