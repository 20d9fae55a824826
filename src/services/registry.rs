//! FileRegistry — in-memory index of every stored file.
//!
//! The registry is the single source of truth for which files exist. A record
//! is only inserted after its bytes are durable, so any id a reader can see is
//! downloadable. Records live for the lifetime of the process.

use crate::models::file::FileRecord;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("file id `{0}` is already registered")]
    DuplicateId(Uuid),
    #[error("record id `{record}` does not match key `{key}`")]
    IdMismatch { key: Uuid, record: Uuid },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Concurrency-safe map from file id to [`FileRecord`].
///
/// Cloning is cheap and every clone shares the same map. All access goes
/// through one `RwLock`, and records are inserted whole while holding the
/// write guard, so readers see either the state before or after a `put`.
#[derive(Clone, Default)]
pub struct FileRegistry {
    records: Arc<RwLock<HashMap<Uuid, FileRecord>>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a single record under `id`.
    ///
    /// Fails with `DuplicateId` if the id is already present, which means the
    /// generator collided or a caller registered the same file twice.
    pub async fn put(&self, id: Uuid, record: FileRecord) -> RegistryResult<()> {
        if record.id != id {
            return Err(RegistryError::IdMismatch {
                key: id,
                record: record.id,
            });
        }
        let mut map = self.records.write().await;
        if map.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        map.insert(id, record);
        Ok(())
    }

    /// Insert all `records` at once, or none of them.
    ///
    /// Every id is checked against the map (and against the rest of the batch)
    /// before anything is inserted.
    pub async fn put_all(&self, records: Vec<FileRecord>) -> RegistryResult<()> {
        let mut map = self.records.write().await;
        let mut batch_ids = HashSet::with_capacity(records.len());
        for record in &records {
            if map.contains_key(&record.id) || !batch_ids.insert(record.id) {
                return Err(RegistryError::DuplicateId(record.id));
            }
        }
        map.extend(records.into_iter().map(|record| (record.id, record)));
        Ok(())
    }

    /// Look up a record. A miss is a normal outcome, not an error.
    pub async fn get(&self, id: &Uuid) -> Option<FileRecord> {
        self.records.read().await.get(id).cloned()
    }

    /// Owned snapshot of every record, oldest upload first.
    pub async fn list(&self) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: Uuid, filename: &str, size: u64) -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id,
            filename: filename.to_string(),
            storage_location: format!("00/00/{id}"),
            content_type: None,
            size_bytes: size,
            etag: String::new(),
            uploaded_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn put_then_get() {
        let registry = FileRegistry::new();
        let id = Uuid::new_v4();
        registry.put(id, record(id, "a.txt", 11)).await.unwrap();

        let found = registry.get(&id).await.unwrap();
        assert_eq!(found.filename, "a.txt");
        assert_eq!(found.size_bytes, 11);
        assert!(registry.get(&Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_put_is_rejected_and_keeps_first() {
        let registry = FileRegistry::new();
        let id = Uuid::new_v4();
        registry.put(id, record(id, "first", 1)).await.unwrap();

        let err = registry.put(id, record(id, "second", 2)).await.unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId(id));
        assert_eq!(registry.get(&id).await.unwrap().filename, "first");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn put_rejects_mismatched_key() {
        let registry = FileRegistry::new();
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        let err = registry.put(other, record(id, "x", 1)).await.unwrap_err();
        assert!(matches!(err, RegistryError::IdMismatch { .. }));
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn put_all_is_all_or_nothing() {
        let registry = FileRegistry::new();
        let existing = Uuid::new_v4();
        registry
            .put(existing, record(existing, "existing", 1))
            .await
            .unwrap();

        let fresh = Uuid::new_v4();
        let err = registry
            .put_all(vec![record(fresh, "fresh", 1), record(existing, "clash", 1)])
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId(existing));
        assert!(registry.get(&fresh).await.is_none());
        assert_eq!(registry.len().await, 1);

        let repeated = Uuid::new_v4();
        let err = registry
            .put_all(vec![record(repeated, "a", 1), record(repeated, "b", 1)])
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId(repeated));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn list_is_a_detached_snapshot() {
        let registry = FileRegistry::new();
        let first = Uuid::new_v4();
        registry.put(first, record(first, "one", 1)).await.unwrap();

        let snapshot = registry.list().await;
        let second = Uuid::new_v4();
        registry.put(second, record(second, "two", 2)).await.unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, first);
        assert_eq!(registry.list().await.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readers_never_see_partial_records() {
        let registry = FileRegistry::new();
        let ids: Vec<Uuid> = (0..200).map(|_| Uuid::new_v4()).collect();

        let writer = {
            let registry = registry.clone();
            let ids = ids.clone();
            tokio::spawn(async move {
                for id in ids {
                    registry.put(id, record(id, "payload.bin", 42)).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            let ids = ids.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..20 {
                    for id in &ids {
                        if let Some(found) = registry.get(id).await {
                            assert_eq!(found.id, *id);
                            assert_eq!(found.filename, "payload.bin");
                            assert_eq!(found.size_bytes, 42);
                        }
                    }
                    for found in registry.list().await {
                        assert!(!found.filename.is_empty());
                        assert!(found.size_bytes > 0);
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(registry.len().await, ids.len());
    }
}
