//! Upload path: store an original, then hand its id to the worker.
//!
//! An upload is only enqueued after the original and its metadata record
//! are durably stored, so the worker never sees an id it cannot fetch
//! (unless the photo is removed in between).

pub mod discovery;

pub use discovery::{DiscoveredFile, FileDiscovery};

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::error::IngestError;
use crate::queue::QueueChannel;
use crate::store::{BlobStore, ObjectId};
use crate::types::{Photo, ProcessingTask};

/// Accepts uploads into the originals bucket and enqueues them.
pub struct Ingestor {
    store: Arc<dyn BlobStore>,
    queue: Arc<dyn QueueChannel>,
    bucket: String,
    topic: String,
    allowed_types: Vec<String>,
}

impl Ingestor {
    pub fn new(config: &Config, store: Arc<dyn BlobStore>, queue: Arc<dyn QueueChannel>) -> Self {
        Self {
            store,
            queue,
            bucket: config.buckets.originals.clone(),
            topic: config.queue.topic.clone(),
            allowed_types: config
                .ingest
                .allowed_types
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
        }
    }

    /// Store an original and enqueue it for thumbnailing.
    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        user_id: &str,
    ) -> Result<ObjectId, IngestError> {
        let content_type = self.check_content_type(content_type)?;
        if bytes.is_empty() {
            return Err(IngestError::Empty);
        }
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(IngestError::MissingUser);
        }

        let size = bytes.len();
        let metadata = Photo::new_metadata(&content_type, user_id);
        let photo_id = self.store.store(&self.bucket, bytes, metadata).await?;
        tracing::info!(%photo_id, %content_type, size, "Stored original");

        self.enqueue(&photo_id).await?;
        Ok(photo_id)
    }

    /// Upload a file from disk, deriving its content type from the extension.
    pub async fn upload_file(&self, path: &Path, user_id: &str) -> Result<ObjectId, IngestError> {
        let content_type = content_type_for_path(path).ok_or_else(|| {
            IngestError::UnsupportedType(
                path.extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string()),
            )
        })?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| IngestError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        self.upload(bytes, content_type, user_id).await
    }

    /// Put an already stored photo on the processing topic.
    pub async fn enqueue(&self, photo_id: &ObjectId) -> Result<(), IngestError> {
        let payload = ProcessingTask::new(photo_id.clone()).to_payload();
        self.queue
            .enqueue(&self.topic, payload)
            .await
            .map_err(|source| IngestError::Enqueue {
                photo_id: photo_id.to_string(),
                source,
            })?;
        tracing::debug!(%photo_id, topic = %self.topic, "Enqueued photo");
        Ok(())
    }

    /// Normalize a content type and check it against the allow list.
    fn check_content_type(&self, content_type: &str) -> Result<String, IngestError> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        if self.allowed_types.iter().any(|t| *t == essence) {
            Ok(essence)
        } else {
            Err(IngestError::UnsupportedType(content_type.to_string()))
        }
    }
}

/// MIME type for an image file, by extension.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Preferred file extension for a MIME type.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::store::MemoryBlobStore;

    fn ingestor() -> (Ingestor, Arc<MemoryBlobStore>, MemoryQueue) {
        let store = Arc::new(MemoryBlobStore::new());
        let queue = MemoryQueue::new();
        let ingestor = Ingestor::new(
            &Config::default(),
            store.clone(),
            Arc::new(queue.clone()),
        );
        (ingestor, store, queue)
    }

    #[tokio::test]
    async fn test_upload_stores_then_enqueues() {
        let (ingestor, store, queue) = ingestor();
        let id = ingestor
            .upload(b"jpeg bytes".to_vec(), "image/jpeg", "u1")
            .await
            .unwrap();

        let meta = store.metadata("originals", &id).await.unwrap().unwrap();
        let photo = Photo::from_metadata("originals", id.clone(), &meta).unwrap();
        assert_eq!(photo.content_type, "image/jpeg");
        assert_eq!(photo.user_id, "u1");
        assert!(!photo.is_processed());

        let mut sub = queue.consume("photos").await.unwrap();
        let delivery = sub.next().await.unwrap();
        assert_eq!(
            ProcessingTask::from_payload(delivery.payload()).unwrap().photo_id,
            id
        );
        delivery.ack();
    }

    #[tokio::test]
    async fn test_content_type_parameters_are_ignored() {
        let (ingestor, store, _) = ingestor();
        let id = ingestor
            .upload(b"png".to_vec(), "Image/PNG; charset=binary", "u1")
            .await
            .unwrap();
        let meta = store.metadata("originals", &id).await.unwrap().unwrap();
        assert_eq!(meta["contentType"], "image/png");
    }

    #[tokio::test]
    async fn test_rejections_store_nothing() {
        let (ingestor, store, queue) = ingestor();

        let err = ingestor
            .upload(b"gif".to_vec(), "image/gif", "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedType(_)));

        let err = ingestor
            .upload(Vec::new(), "image/jpeg", "u1")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Empty));

        let err = ingestor
            .upload(b"x".to_vec(), "image/jpeg", "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::MissingUser));

        assert_eq!(store.object_count("originals"), 0);
        assert_eq!(queue.stats("photos").enqueued, 0);
    }

    #[tokio::test]
    async fn test_upload_file() {
        let (ingestor, store, _) = ingestor();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.JPG");
        std::fs::write(&path, b"bytes").unwrap();

        let id = ingestor.upload_file(&path, "u9").await.unwrap();
        assert!(store.contains("originals", &id));

        let err = ingestor
            .upload_file(&dir.path().join("missing.png"), "u9")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Read { .. }));
    }

    #[test]
    fn test_extension_mapping() {
        assert_eq!(content_type_for_path(Path::new("a.jpeg")), Some("image/jpeg"));
        assert_eq!(content_type_for_path(Path::new("a.PNG")), Some("image/png"));
        assert_eq!(content_type_for_path(Path::new("a.txt")), None);
        assert_eq!(content_type_for_path(Path::new("noext")), None);
        assert_eq!(extension_for("image/jpeg"), Some("jpg"));
        assert_eq!(extension_for("image/png"), Some("png"));
        assert_eq!(extension_for("text/plain"), None);
    }
}
