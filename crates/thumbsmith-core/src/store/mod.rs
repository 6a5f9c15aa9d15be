//! Blob storage for originals and derived thumbnails.
//!
//! A blob store keeps byte payloads in named buckets under generated ids,
//! each with a JSON metadata record. Metadata can be patched with a guarded
//! update so that concurrent writers never overwrite each other's links.
//!
//! - **memory**: in-process store with fault injection, used by tests
//! - **fs**: directory-backed store used by the CLI

pub mod fs;
pub mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::StoreError;

/// Metadata record attached to a stored object.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A chunked read stream over a stored object.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, StoreError>>;

/// Chunk size used when streaming objects out of a store.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Opaque 12-byte object identifier, rendered as 24 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(String);

impl ObjectId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Parse an id, accepting either hex case.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(s.to_ascii_lowercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid object id '{value}'"))
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

/// Precondition for a metadata patch.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    /// Apply only if `key` is missing/null or already holds `value`.
    AbsentOrEquals {
        key: String,
        value: serde_json::Value,
    },
}

/// A guarded set of field assignments on a metadata record.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalUpdate {
    pub guard: Guard,
    pub set: Metadata,
}

/// Result of a metadata patch.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOutcome {
    /// The record was modified.
    Applied,
    /// The guard held but every field already had the requested value.
    Unchanged,
    /// The guard did not hold; `current` is the guarded field's value.
    GuardFailed { current: Option<serde_json::Value> },
    /// No record with this id exists.
    NotFound,
}

impl ConditionalUpdate {
    /// Evaluate the guard and apply the assignments to `meta` in place.
    ///
    /// Stores call this while holding whatever makes the record update atomic.
    pub fn apply(&self, meta: &mut Metadata) -> PatchOutcome {
        let Guard::AbsentOrEquals { key, value } = &self.guard;
        match meta.get(key) {
            None | Some(serde_json::Value::Null) => {}
            Some(current) if current == value => {}
            Some(current) => {
                return PatchOutcome::GuardFailed {
                    current: Some(current.clone()),
                }
            }
        }

        let unchanged = self.set.iter().all(|(k, v)| meta.get(k) == Some(v));
        if unchanged {
            return PatchOutcome::Unchanged;
        }
        for (k, v) in &self.set {
            meta.insert(k.clone(), v.clone());
        }
        PatchOutcome::Applied
    }
}

/// Content-addressable storage of byte payloads with per-object metadata.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write a new object and return its generated id.
    async fn store(
        &self,
        bucket: &str,
        bytes: Vec<u8>,
        metadata: Metadata,
    ) -> Result<ObjectId, StoreError>;

    /// Open a read stream. Fails with [`StoreError::NotFound`] for unknown ids.
    async fn open_read_stream(&self, bucket: &str, id: &ObjectId)
        -> Result<ByteStream, StoreError>;

    /// Read an object's metadata record, `None` if the object does not exist.
    async fn metadata(&self, bucket: &str, id: &ObjectId) -> Result<Option<Metadata>, StoreError>;

    /// Atomically apply a guarded update to an object's metadata record.
    async fn patch_metadata(
        &self,
        bucket: &str,
        id: &ObjectId,
        update: &ConditionalUpdate,
    ) -> Result<PatchOutcome, StoreError>;
}

/// Add the fields every store records on write.
pub(crate) fn stamp_metadata(metadata: &mut Metadata, bytes: &[u8]) {
    metadata.insert("size".into(), (bytes.len() as u64).into());
    metadata.insert(
        "contentHash".into(),
        blake3::hash(bytes).to_hex().to_string().into(),
    );
    let uploaded_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    metadata.insert("uploadedAt".into(), uploaded_at.into());
}

/// Drain a read stream into memory.
pub async fn read_to_end(mut stream: ByteStream) -> Result<Vec<u8>, StoreError> {
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer)
}
