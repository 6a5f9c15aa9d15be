//! Read-side lookups over photos and their thumbnails.

use std::sync::Arc;

use crate::config::BucketConfig;
use crate::error::StoreError;
use crate::store::{read_to_end, BlobStore, ObjectId};
use crate::types::{Photo, Thumbnail};

/// Typed read access to the originals and thumbnails buckets.
pub struct Catalog {
    store: Arc<dyn BlobStore>,
    buckets: BucketConfig,
}

impl Catalog {
    pub fn new(store: Arc<dyn BlobStore>, buckets: BucketConfig) -> Self {
        Self { store, buckets }
    }

    pub async fn photo(&self, id: &ObjectId) -> Result<Option<Photo>, StoreError> {
        let bucket = &self.buckets.originals;
        match self.store.metadata(bucket, id).await? {
            Some(meta) => Photo::from_metadata(bucket, id.clone(), &meta).map(Some),
            None => Ok(None),
        }
    }

    pub async fn thumbnail(&self, id: &ObjectId) -> Result<Option<Thumbnail>, StoreError> {
        let bucket = &self.buckets.thumbnails;
        match self.store.metadata(bucket, id).await? {
            Some(meta) => Thumbnail::from_metadata(bucket, id.clone(), &meta).map(Some),
            None => Ok(None),
        }
    }

    /// The thumbnail linked to a photo, `None` until processing completes.
    pub async fn thumbnail_for(
        &self,
        photo_id: &ObjectId,
    ) -> Result<Option<Thumbnail>, StoreError> {
        let Some(thumb_id) = self.photo(photo_id).await?.and_then(|p| p.thumb_id) else {
            return Ok(None);
        };
        self.thumbnail(&thumb_id).await
    }

    /// Read a thumbnail's encoded bytes.
    pub async fn read_thumbnail_bytes(&self, thumb_id: &ObjectId) -> Result<Vec<u8>, StoreError> {
        let stream = self
            .store
            .open_read_stream(&self.buckets.thumbnails, thumb_id)
            .await?;
        read_to_end(stream).await
    }
}
