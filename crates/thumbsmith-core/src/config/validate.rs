//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

const THUMBNAIL_FORMATS: &[&str] = &["jpeg", "jpg", "png", "webp"];

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "worker.concurrency must be > 0".into(),
            ));
        }
        if self.queue.topic.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "queue.topic must not be empty".into(),
            ));
        }
        if self.buckets.originals.is_empty() || self.buckets.thumbnails.is_empty() {
            return Err(ConfigError::ValidationError(
                "buckets.originals and buckets.thumbnails must not be empty".into(),
            ));
        }
        if self.buckets.originals == self.buckets.thumbnails {
            return Err(ConfigError::ValidationError(
                "buckets.originals and buckets.thumbnails must differ".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be > 0".into(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.max_delay_ms must be >= retry.base_delay_ms".into(),
            ));
        }
        let timeouts = [
            ("timeouts.fetch_ms", self.timeouts.fetch_ms),
            ("timeouts.derive_ms", self.timeouts.derive_ms),
            ("timeouts.store_ms", self.timeouts.store_ms),
            ("timeouts.link_ms", self.timeouts.link_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
            }
        }
        if self.limits.max_original_size_mb == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_original_size_mb must be > 0".into(),
            ));
        }
        if self.limits.max_image_dimension == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_image_dimension must be > 0".into(),
            ));
        }
        if self.thumbnail.width == 0 || self.thumbnail.height == 0 {
            return Err(ConfigError::ValidationError(
                "thumbnail.width and thumbnail.height must be > 0".into(),
            ));
        }
        if !THUMBNAIL_FORMATS.contains(&self.thumbnail.format.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "thumbnail.format must be one of {THUMBNAIL_FORMATS:?}, got '{}'",
                self.thumbnail.format
            )));
        }
        if self.thumbnail.quality == 0 || self.thumbnail.quality > 100 {
            return Err(ConfigError::ValidationError(
                "thumbnail.quality must be between 1 and 100".into(),
            ));
        }
        if self.ingest.allowed_types.is_empty() {
            return Err(ConfigError::ValidationError(
                "ingest.allowed_types must not be empty".into(),
            ));
        }
        Ok(())
    }
}
