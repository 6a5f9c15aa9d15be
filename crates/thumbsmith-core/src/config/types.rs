//! Sub-configuration structs with their defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Root directory of the filesystem blob store
    pub store_dir: PathBuf,

    /// Directory for scratch files while buffering large originals
    pub scratch_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("~/.thumbsmith/store"),
            scratch_dir: PathBuf::from("~/.thumbsmith/scratch"),
        }
    }
}

/// Queue channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Topic carrying photo ids to the thumbnail worker
    pub topic: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            topic: "photos".to_string(),
        }
    }
}

/// Blob store bucket names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Bucket holding uploaded originals
    pub originals: String,

    /// Bucket holding derived thumbnails
    pub thumbnails: String,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            originals: "originals".to_string(),
            thumbnails: "thumbnails".to_string(),
        }
    }
}

/// Worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum tasks processed in parallel
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// Bounded redelivery policy for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Delivery attempts before a transient failure is escalated to permanent
    pub max_attempts: u32,

    /// Backoff before the first redelivery in milliseconds
    pub base_delay_ms: u64,

    /// Upper bound on the backoff in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

/// Per-step timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Reading the photo record and original stream
    pub fetch_ms: u64,

    /// Decode, resize and encode
    pub derive_ms: u64,

    /// Writing the thumbnail
    pub store_ms: u64,

    /// Conditional metadata update
    pub link_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fetch_ms: 30_000,
            derive_ms: 30_000,
            store_ms: 15_000,
            link_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    pub fn fetch(&self) -> Duration {
        Duration::from_millis(self.fetch_ms)
    }

    pub fn derive(&self) -> Duration {
        Duration::from_millis(self.derive_ms)
    }

    pub fn store(&self) -> Duration {
        Duration::from_millis(self.store_ms)
    }

    pub fn link(&self) -> Duration {
        Duration::from_millis(self.link_ms)
    }
}

/// Resource limits to protect against problematic inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum original size in megabytes
    pub max_original_size_mb: u64,

    /// Maximum image dimension (width or height)
    pub max_image_dimension: u32,

    /// Originals above this size are buffered to a scratch file, in kilobytes
    pub spill_threshold_kb: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_original_size_mb: 100,
            max_image_dimension: 20_000,
            spill_threshold_kb: 16 * 1024,
        }
    }
}

impl LimitsConfig {
    pub fn max_original_bytes(&self) -> u64 {
        self.max_original_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn spill_threshold_bytes(&self) -> u64 {
        self.spill_threshold_kb.saturating_mul(1024)
    }
}

/// Thumbnail generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Target width in pixels
    pub width: u32,

    /// Target height in pixels
    pub height: u32,

    /// Output format: "jpeg", "png" or "webp"
    pub format: String,

    /// Encoder quality (1-100, JPEG only)
    pub quality: u8,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: 100,
            height: 100,
            format: "jpeg".to_string(),
            quality: 80,
        }
    }
}

/// Upload acceptance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// MIME types accepted for upload
    pub allowed_types: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            allowed_types: vec!["image/jpeg".to_string(), "image/png".to_string()],
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
