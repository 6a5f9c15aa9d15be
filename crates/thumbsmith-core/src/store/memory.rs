//! In-process blob store with fault injection.
//!
//! Used by tests to simulate unreachable stores, failing writes and
//! records that vanish mid-workflow.

use async_trait::async_trait;
use futures_util::stream;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{
    stamp_metadata, BlobStore, ByteStream, ConditionalUpdate, Metadata, ObjectId, PatchOutcome,
    READ_CHUNK_SIZE,
};
use crate::error::StoreError;

struct StoredObject {
    bytes: Arc<Vec<u8>>,
    metadata: Metadata,
}

type Key = (String, ObjectId);

/// A blob store held entirely in memory.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<Key, StoredObject>>,
    unavailable: AtomicBool,
    fail_next_stores: AtomicU32,
    fail_next_patches: AtomicU32,
    store_calls: AtomicU64,
    read_delay_ms: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`StoreError::Unavailable`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `n` writes with [`StoreError::Unavailable`].
    pub fn fail_next_stores(&self, n: u32) {
        self.fail_next_stores.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` metadata patches with [`StoreError::Unavailable`].
    pub fn fail_next_patches(&self, n: u32) {
        self.fail_next_patches.store(n, Ordering::SeqCst);
    }

    /// Delay every read stream open by `delay`.
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of `store` calls that reached the store, including failed ones.
    pub fn store_calls(&self) -> u64 {
        self.store_calls.load(Ordering::SeqCst)
    }

    /// Number of objects currently held in `bucket`.
    pub fn object_count(&self, bucket: &str) -> usize {
        self.lock().keys().filter(|(b, _)| b == bucket).count()
    }

    /// Whether an object exists.
    pub fn contains(&self, bucket: &str, id: &ObjectId) -> bool {
        self.lock().contains_key(&(bucket.to_string(), id.clone()))
    }

    /// Delete an object outright.
    pub fn remove(&self, bucket: &str, id: &ObjectId) -> bool {
        self.lock()
            .remove(&(bucket.to_string(), id.clone()))
            .is_some()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Key, StoredObject>> {
        // A poisoned map is still structurally valid.
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }
}

/// Decrement a fault counter, returning true if a fault should fire.
fn take_fault(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store(
        &self,
        bucket: &str,
        bytes: Vec<u8>,
        mut metadata: Metadata,
    ) -> Result<ObjectId, StoreError> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if take_fault(&self.fail_next_stores) {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }

        stamp_metadata(&mut metadata, &bytes);
        let id = ObjectId::generate();
        self.lock().insert(
            (bucket.to_string(), id.clone()),
            StoredObject {
                bytes: Arc::new(bytes),
                metadata,
            },
        );
        Ok(id)
    }

    async fn open_read_stream(
        &self,
        bucket: &str,
        id: &ObjectId,
    ) -> Result<ByteStream, StoreError> {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check_available()?;

        let bytes = self
            .lock()
            .get(&(bucket.to_string(), id.clone()))
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                id: id.to_string(),
            })?;

        let chunks: Vec<Result<Vec<u8>, StoreError>> = bytes
            .chunks(READ_CHUNK_SIZE)
            .map(|c| Ok(c.to_vec()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn metadata(&self, bucket: &str, id: &ObjectId) -> Result<Option<Metadata>, StoreError> {
        self.check_available()?;
        Ok(self
            .lock()
            .get(&(bucket.to_string(), id.clone()))
            .map(|obj| obj.metadata.clone()))
    }

    async fn patch_metadata(
        &self,
        bucket: &str,
        id: &ObjectId,
        update: &ConditionalUpdate,
    ) -> Result<PatchOutcome, StoreError> {
        self.check_available()?;
        if take_fault(&self.fail_next_patches) {
            return Err(StoreError::Unavailable("injected patch failure".into()));
        }

        let mut objects = self.lock();
        match objects.get_mut(&(bucket.to_string(), id.clone())) {
            Some(obj) => Ok(update.apply(&mut obj.metadata)),
            None => Ok(PatchOutcome::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{read_to_end, Guard};
    use serde_json::json;

    #[tokio::test]
    async fn test_store_and_read_back() {
        let store = MemoryBlobStore::new();
        let payload = vec![7u8; READ_CHUNK_SIZE * 2 + 10];
        let id = store
            .store("originals", payload.clone(), Metadata::new())
            .await
            .unwrap();

        let stream = store.open_read_stream("originals", &id).await.unwrap();
        assert_eq!(read_to_end(stream).await.unwrap(), payload);

        let meta = store.metadata("originals", &id).await.unwrap().unwrap();
        assert_eq!(meta["size"], json!(payload.len()));
    }

    #[tokio::test]
    async fn test_missing_object() {
        let store = MemoryBlobStore::new();
        let id = ObjectId::generate();
        let err = store.open_read_stream("originals", &id).await.err().unwrap();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.metadata("originals", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_buckets_are_separate() {
        let store = MemoryBlobStore::new();
        let id = store
            .store("originals", b"x".to_vec(), Metadata::new())
            .await
            .unwrap();
        assert!(store.metadata("thumbnails", &id).await.unwrap().is_none());
        assert_eq!(store.object_count("originals"), 1);
        assert_eq!(store.object_count("thumbnails"), 0);
    }

    #[tokio::test]
    async fn test_fail_next_stores() {
        let store = MemoryBlobStore::new();
        store.fail_next_stores(1);
        let err = store
            .store("thumbnails", b"x".to_vec(), Metadata::new())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(store
            .store("thumbnails", b"x".to_vec(), Metadata::new())
            .await
            .is_ok());
        assert_eq!(store.store_calls(), 2);
        assert_eq!(store.object_count("thumbnails"), 1);
    }

    #[tokio::test]
    async fn test_patch_missing_record() {
        let store = MemoryBlobStore::new();
        let update = ConditionalUpdate {
            guard: Guard::AbsentOrEquals {
                key: "thumbId".into(),
                value: "x".into(),
            },
            set: Metadata::new(),
        };
        let outcome = store
            .patch_metadata("originals", &ObjectId::generate(), &update)
            .await
            .unwrap();
        assert_eq!(outcome, PatchOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryBlobStore::new();
        store.set_unavailable(true);
        let err = store
            .metadata("originals", &ObjectId::generate())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
