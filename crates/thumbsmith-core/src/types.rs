//! Core data types: photos, thumbnails and processing tasks.
//!
//! Photos and thumbnails live in the blob store as opaque bytes plus a JSON
//! metadata record. These types are typed views over those records; the
//! record keys are camelCase.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StoreError;
use crate::store::{Metadata, ObjectId};

/// Metadata key linking a photo to its thumbnail.
pub const THUMB_ID_KEY: &str = "thumbId";
/// Metadata key holding the derived dimensions of a photo.
pub const DIMENSIONS_KEY: &str = "dimensions";

/// Pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One uploaded original asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    /// Blob store id of the original
    pub id: ObjectId,

    /// MIME type of the original
    pub content_type: String,

    /// Owning user reference
    pub user_id: String,

    /// Linked thumbnail, absent until processing completes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb_id: Option<ObjectId>,

    /// Set when the thumbnail is linked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhotoRecord {
    content_type: String,
    user_id: String,
    #[serde(default)]
    thumb_id: Option<ObjectId>,
    #[serde(default)]
    dimensions: Option<Dimensions>,
}

impl Photo {
    /// Build the initial metadata record stored alongside a new original.
    pub fn new_metadata(content_type: &str, user_id: &str) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert("contentType".into(), content_type.into());
        meta.insert("userId".into(), user_id.into());
        meta
    }

    /// Decode a photo from its stored metadata record.
    pub fn from_metadata(
        bucket: &str,
        id: ObjectId,
        meta: &Metadata,
    ) -> Result<Self, StoreError> {
        let record: PhotoRecord = decode(bucket, &id, meta)?;
        Ok(Self {
            id,
            content_type: record.content_type,
            user_id: record.user_id,
            thumb_id: record.thumb_id,
            dimensions: record.dimensions,
        })
    }

    /// Whether processing has already linked a thumbnail.
    pub fn is_processed(&self) -> bool {
        self.thumb_id.is_some()
    }
}

/// The derived small-format rendition of a photo.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thumbnail {
    pub id: ObjectId,
    pub source_photo_id: ObjectId,
    pub content_type: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThumbnailRecord {
    source_photo_id: ObjectId,
    content_type: String,
    width: u32,
    height: u32,
}

impl Thumbnail {
    /// Metadata record written alongside the thumbnail bytes.
    pub fn new_metadata(source: &ObjectId, content_type: &str, dims: Dimensions) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert("sourcePhotoId".into(), source.as_str().into());
        meta.insert("contentType".into(), content_type.into());
        meta.insert("width".into(), dims.width.into());
        meta.insert("height".into(), dims.height.into());
        meta
    }

    pub fn from_metadata(
        bucket: &str,
        id: ObjectId,
        meta: &Metadata,
    ) -> Result<Self, StoreError> {
        let record: ThumbnailRecord = decode(bucket, &id, meta)?;
        Ok(Self {
            id,
            source_photo_id: record.source_photo_id,
            content_type: record.content_type,
            width: record.width,
            height: record.height,
        })
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(
    bucket: &str,
    id: &ObjectId,
    meta: &Metadata,
) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::Object(meta.clone())).map_err(|e| {
        StoreError::CorruptMetadata {
            bucket: bucket.to_string(),
            id: id.to_string(),
            message: e.to_string(),
        }
    })
}

/// The unit of work carried on the processing topic.
///
/// The payload is the photo id as UTF-8 text and nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingTask {
    pub photo_id: ObjectId,
}

impl ProcessingTask {
    pub fn new(photo_id: ObjectId) -> Self {
        Self { photo_id }
    }

    /// Encode the task as a queue payload.
    pub fn to_payload(&self) -> Vec<u8> {
        self.photo_id.as_str().as_bytes().to_vec()
    }

    /// Decode a queue payload. Returns a description of the problem when the
    /// payload does not carry a well-formed photo id.
    pub fn from_payload(payload: &[u8]) -> Result<Self, String> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| format!("payload is not UTF-8: {e}"))?
            .trim();
        if text.is_empty() {
            return Err("payload is empty".to_string());
        }
        let photo_id = ObjectId::parse(text)
            .ok_or_else(|| format!("'{}' is not a valid object id", truncate(text, 64)))?;
        Ok(Self { photo_id })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_photo_from_metadata() {
        let id = ObjectId::generate();
        let mut meta = Photo::new_metadata("image/jpeg", "u1");
        meta.insert(THUMB_ID_KEY.into(), "0123456789abcdef01234567".into());
        meta.insert(
            DIMENSIONS_KEY.into(),
            serde_json::json!({"width": 100, "height": 100}),
        );

        let photo = Photo::from_metadata("originals", id.clone(), &meta).unwrap();
        assert_eq!(photo.id, id);
        assert_eq!(photo.content_type, "image/jpeg");
        assert_eq!(photo.user_id, "u1");
        assert!(photo.is_processed());
        assert_eq!(
            photo.dimensions,
            Some(Dimensions {
                width: 100,
                height: 100
            })
        );
    }

    #[test]
    fn test_unprocessed_photo() {
        let meta = Photo::new_metadata("image/png", "u2");
        let photo = Photo::from_metadata("originals", ObjectId::generate(), &meta).unwrap();
        assert!(!photo.is_processed());
        assert!(photo.dimensions.is_none());
    }

    #[test]
    fn test_photo_missing_fields_is_corrupt() {
        let meta = Metadata::new();
        let err = Photo::from_metadata("originals", ObjectId::generate(), &meta).unwrap_err();
        assert!(matches!(err, StoreError::CorruptMetadata { .. }));
    }

    #[test]
    fn test_thumbnail_metadata_roundtrip() {
        let source = ObjectId::generate();
        let dims = Dimensions {
            width: 100,
            height: 80,
        };
        let meta = Thumbnail::new_metadata(&source, "image/jpeg", dims);
        let thumb = Thumbnail::from_metadata("thumbnails", ObjectId::generate(), &meta).unwrap();
        assert_eq!(thumb.source_photo_id, source);
        assert_eq!(thumb.dimensions(), dims);
    }

    #[test]
    fn test_task_payload_trims_whitespace() {
        let id = ObjectId::generate();
        let payload = format!("  {}\n", id);
        let task = ProcessingTask::from_payload(payload.as_bytes()).unwrap();
        assert_eq!(task.photo_id, id);
    }

    #[test]
    fn test_task_payload_rejects_garbage() {
        assert!(ProcessingTask::from_payload(b"").is_err());
        assert!(ProcessingTask::from_payload(b"   ").is_err());
        assert!(ProcessingTask::from_payload(&[0xff, 0xfe]).is_err());
        assert!(ProcessingTask::from_payload(b"not-an-id").is_err());
    }
}
