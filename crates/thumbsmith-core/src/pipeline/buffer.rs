//! Buffering an original out of its read stream.
//!
//! Small originals stay in memory. Once the running size passes the spill
//! threshold the bytes move to a scratch file, which is deleted when the
//! buffer is dropped, whichever way the task ends.

use futures_util::StreamExt;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use crate::config::LimitsConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::store::{ByteStream, ObjectId};

/// The bytes of one original, held for the duration of a task.
#[derive(Debug)]
pub enum OriginalBuffer {
    Memory(Vec<u8>),
    Spilled { file: NamedTempFile, size: u64 },
}

impl OriginalBuffer {
    pub fn len(&self) -> u64 {
        match self {
            OriginalBuffer::Memory(bytes) => bytes.len() as u64,
            OriginalBuffer::Spilled { size, .. } => *size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Path of the scratch file, if the original was spilled.
    pub fn scratch_path(&self) -> Option<&Path> {
        match self {
            OriginalBuffer::Memory(_) => None,
            OriginalBuffer::Spilled { file, .. } => Some(file.path()),
        }
    }

    /// Run `f` with a seekable reader over the bytes.
    pub fn with_reader<T>(
        &self,
        f: impl FnOnce(&mut dyn ReadSeek) -> std::io::Result<T>,
    ) -> std::io::Result<T> {
        match self {
            OriginalBuffer::Memory(bytes) => f(&mut Cursor::new(bytes.as_slice())),
            OriginalBuffer::Spilled { file, .. } => {
                let mut reader = BufReader::new(file.reopen()?);
                f(&mut reader)
            }
        }
    }
}

/// Combined `BufRead + Seek` so readers can be passed as one trait object.
pub trait ReadSeek: std::io::BufRead + std::io::Seek {}

impl<T: std::io::BufRead + std::io::Seek> ReadSeek for T {}

/// Drains read streams into [`OriginalBuffer`]s under the configured limits.
pub struct Buffering {
    max_bytes: u64,
    max_mb: u64,
    spill_threshold: u64,
    scratch_dir: PathBuf,
}

impl Buffering {
    pub fn new(limits: &LimitsConfig, scratch_dir: PathBuf) -> Self {
        Self {
            max_bytes: limits.max_original_bytes(),
            max_mb: limits.max_original_size_mb,
            spill_threshold: limits.spill_threshold_bytes(),
            scratch_dir,
        }
    }


    /// Read the whole stream. Fails permanently when the original exceeds the
    /// size limit; any partially written scratch file is removed.
    pub async fn drain(
        &self,
        photo_id: &ObjectId,
        mut stream: ByteStream,
    ) -> PipelineResult<OriginalBuffer> {
        let mut memory: Vec<u8> = Vec::new();
        let mut spill: Option<(NamedTempFile, tokio::fs::File)> = None;
        let mut total: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| PipelineError::Store {
                photo_id: photo_id.to_string(),
                stage: "fetching".to_string(),
                source,
            })?;
            total += chunk.len() as u64;
            if total > self.max_bytes {
                return Err(PipelineError::OriginalTooLarge {
                    photo_id: photo_id.to_string(),
                    size_mb: total.div_ceil(1024 * 1024),
                    max_mb: self.max_mb,
                });
            }

            if spill.is_none() && total > self.spill_threshold {
                let (temp, mut writer) = self.create_scratch(photo_id).await?;
                writer
                    .write_all(&memory)
                    .await
                    .map_err(|source| scratch_error(photo_id, source))?;
                memory = Vec::new();
                tracing::debug!(%photo_id, path = ?temp.path(), "Spilling original to scratch file");
                spill = Some((temp, writer));
            }

            match spill.as_mut() {
                Some((_, writer)) => writer
                    .write_all(&chunk)
                    .await
                    .map_err(|source| scratch_error(photo_id, source))?,
                None => memory.extend_from_slice(&chunk),
            }
        }

        match spill {
            Some((file, mut writer)) => {
                writer
                    .flush()
                    .await
                    .map_err(|source| scratch_error(photo_id, source))?;
                Ok(OriginalBuffer::Spilled { file, size: total })
            }
            None => Ok(OriginalBuffer::Memory(memory)),
        }
    }

    async fn create_scratch(
        &self,
        photo_id: &ObjectId,
    ) -> PipelineResult<(NamedTempFile, tokio::fs::File)> {
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|source| scratch_error(photo_id, source))?;
        let temp = tempfile::Builder::new()
            .prefix(&format!("{photo_id}-"))
            .suffix(".original")
            .tempfile_in(&self.scratch_dir)
            .map_err(|source| scratch_error(photo_id, source))?;
        let handle = temp
            .as_file()
            .try_clone()
            .map_err(|source| scratch_error(photo_id, source))?;
        Ok((temp, tokio::fs::File::from_std(handle)))
    }
}

fn scratch_error(photo_id: &ObjectId, source: std::io::Error) -> PipelineError {
    PipelineError::Scratch {
        photo_id: photo_id.to_string(),
        source,
    }
}
