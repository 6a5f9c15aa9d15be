//! Directory-backed blob store.
//!
//! Layout: `<root>/<bucket>/<id>.bin` holds the payload and
//! `<root>/<bucket>/<id>.json` the metadata record. Both are written to a
//! temporary file and renamed into place; an object becomes visible once its
//! metadata file exists. A `store` cut short (for example by a timeout) can
//! leave a temp file or a payload without metadata; `open` removes those.

use async_trait::async_trait;
use futures_util::stream;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;

use super::{
    stamp_metadata, BlobStore, ByteStream, ConditionalUpdate, Metadata, ObjectId, PatchOutcome,
    READ_CHUNK_SIZE,
};
use crate::error::StoreError;

/// Blob store rooted at a local directory.
pub struct FsBlobStore {
    root: PathBuf,
    // Serializes read-modify-write of metadata records within this process.
    patch_lock: Mutex<()>,
}

impl FsBlobStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let removed = sweep_partial(&root).await?;
        if removed > 0 {
            tracing::info!(removed, "Removed partial writes from blob store");
        }
        tracing::debug!("Opened blob store at {:?}", root);
        Ok(Self {
            root,
            patch_lock: Mutex::new(()),
        })
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StoreError> {
        let valid = !bucket.is_empty()
            && bucket
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid {
            return Err(StoreError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid bucket name '{bucket}'"),
            )));
        }
        Ok(self.root.join(bucket))
    }

    fn paths(&self, bucket: &str, id: &ObjectId) -> Result<(PathBuf, PathBuf), StoreError> {
        let dir = self.bucket_dir(bucket)?;
        Ok((
            dir.join(format!("{id}.bin")),
            dir.join(format!("{id}.json")),
        ))
    }

    async fn read_metadata(&self, path: &Path) -> Result<Option<Metadata>, StoreError> {
        match tokio::fs::read(path).await {
            Ok(raw) => {
                let meta: Metadata =
                    serde_json::from_slice(&raw).map_err(|e| StoreError::CorruptMetadata {
                        bucket: bucket_of(path),
                        id: id_of(path),
                        message: e.to_string(),
                    })?;
                Ok(Some(meta))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_metadata(&self, path: &Path, meta: &Metadata) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(meta).map_err(std::io::Error::other)?;
        write_atomic(path, &raw).await
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("obj")
    ));
    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Delete temp files and payloads whose metadata record was never written.
async fn sweep_partial(root: &Path) -> Result<usize, StoreError> {
    let mut removed = 0;
    let mut buckets = tokio::fs::read_dir(root).await?;
    while let Some(bucket) = buckets.next_entry().await? {
        if !bucket.file_type().await?.is_dir() {
            continue;
        }
        let mut entries = tokio::fs::read_dir(bucket.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let partial = match path.extension().and_then(|e| e.to_str()) {
                Some("tmp") => true,
                Some("bin") => !tokio::fs::try_exists(path.with_extension("json")).await?,
                _ => false,
            };
            if !partial {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(removed)
}

fn id_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

fn bucket_of(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn store(
        &self,
        bucket: &str,
        bytes: Vec<u8>,
        mut metadata: Metadata,
    ) -> Result<ObjectId, StoreError> {
        let dir = self.bucket_dir(bucket)?;
        tokio::fs::create_dir_all(&dir).await?;

        let id = ObjectId::generate();
        let (data_path, meta_path) = self.paths(bucket, &id)?;
        stamp_metadata(&mut metadata, &bytes);

        write_atomic(&data_path, &bytes).await?;
        if let Err(e) = self.write_metadata(&meta_path, &metadata).await {
            let _ = tokio::fs::remove_file(&data_path).await;
            return Err(e);
        }
        tracing::trace!(bucket, %id, size = bytes.len(), "Stored object");
        Ok(id)
    }

    async fn open_read_stream(
        &self,
        bucket: &str,
        id: &ObjectId,
    ) -> Result<ByteStream, StoreError> {
        let (data_path, meta_path) = self.paths(bucket, id)?;
        let not_found = || StoreError::NotFound {
            bucket: bucket.to_string(),
            id: id.to_string(),
        };
        if !tokio::fs::try_exists(&meta_path).await? {
            return Err(not_found());
        }
        let file = match tokio::fs::File::open(&data_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };

        let chunks = stream::try_unfold(file, |mut file| async move {
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            let n = file.read(&mut buf).await.map_err(StoreError::from)?;
            if n == 0 {
                return Ok::<_, StoreError>(None);
            }
            buf.truncate(n);
            Ok(Some((buf, file)))
        });
        Ok(Box::pin(chunks))
    }

    async fn metadata(&self, bucket: &str, id: &ObjectId) -> Result<Option<Metadata>, StoreError> {
        let (_, meta_path) = self.paths(bucket, id)?;
        self.read_metadata(&meta_path).await
    }

    async fn patch_metadata(
        &self,
        bucket: &str,
        id: &ObjectId,
        update: &ConditionalUpdate,
    ) -> Result<PatchOutcome, StoreError> {
        let (_, meta_path) = self.paths(bucket, id)?;
        let _guard = self.patch_lock.lock().await;

        let Some(mut meta) = self.read_metadata(&meta_path).await? else {
            return Ok(PatchOutcome::NotFound);
        };
        let outcome = update.apply(&mut meta);
        if outcome == PatchOutcome::Applied {
            self.write_metadata(&meta_path, &meta).await?;
        }
        Ok(outcome)
    }
}
