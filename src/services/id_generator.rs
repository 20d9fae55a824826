//! Identifier generation for newly uploaded files.

use uuid::Uuid;

/// Source of identifiers for new files.
///
/// Implementations must be callable concurrently without external locking.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> Uuid;
}

/// Random version-4 UUIDs (122 bits of OS entropy).
///
/// `Uuid::new_v4` panics if the OS random source is unavailable; there is no
/// meaningful way to keep serving uploads in that state.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn generate(&self) -> Uuid {
        Uuid::new_v4()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Arc};

    #[test]
    fn generates_v4_uuids() {
        let id = RandomIdGenerator.generate();
        assert_eq!(id.get_version_num(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_ids_never_collide() {
        let ids: Arc<dyn IdGenerator> = Arc::new(RandomIdGenerator);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ids = ids.clone();
            handles.push(tokio::spawn(async move {
                (0..2_500).map(|_| ids.generate()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 20_000);
    }
}
