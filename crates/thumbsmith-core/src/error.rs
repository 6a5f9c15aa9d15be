//! Error types for the thumbsmith pipeline.
//!
//! Errors are organized by collaborator (store, queue, ingest) and by
//! workflow stage, so each failure carries the identifier and stage it
//! happened in. Pipeline errors are classified as permanent or transient,
//! which decides whether a task is acknowledged or requeued.

use thiserror::Error;

/// Top-level error type for thumbsmith operations.
#[derive(Error, Debug)]
pub enum ThumbsmithError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Blob store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Queue channel errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Upload errors
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// General I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Blob store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No object with this id exists in the bucket
    #[error("Object {id} not found in bucket '{bucket}'")]
    NotFound { bucket: String, id: String },

    /// The store could not be reached or refused the operation for now
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored metadata record could not be decoded
    #[error("Corrupt metadata for {id} in bucket '{bucket}': {message}")]
    CorruptMetadata {
        bucket: String,
        id: String,
        message: String,
    },

    /// Local filesystem failure inside the store
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether a later attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

/// Queue channel errors.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The channel (or the topic's consumer side) is closed
    #[error("Queue channel closed for topic '{0}'")]
    Closed(String),
}

/// Errors raised while accepting an upload.
#[derive(Error, Debug)]
pub enum IngestError {
    /// Content type is not an accepted image type
    #[error("Unsupported content type: {0}")]
    UnsupportedType(String),

    /// Upload body is empty
    #[error("Upload is empty")]
    Empty,

    /// Owning user reference is missing
    #[error("Upload is missing a userId")]
    MissingUser,

    /// Reading an upload from disk failed
    #[error("Failed to read {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Storing the original failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The photo was stored but could not be enqueued
    #[error("Photo {photo_id} stored but not enqueued: {source}")]
    Enqueue {
        photo_id: String,
        #[source]
        source: QueueError,
    },
}

/// Per-task workflow errors, organized by stage.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Task payload does not carry a usable photo id
    #[error("Malformed task payload: {0}")]
    MalformedPayload(String),

    /// The photo record or its original stream does not exist
    #[error("Photo not found: {0}")]
    PhotoNotFound(String),

    /// The original is larger than the configured limit
    #[error("Original too large: {photo_id} ({size_mb}MB > {max_mb}MB)")]
    OriginalTooLarge {
        photo_id: String,
        size_mb: u64,
        max_mb: u64,
    },

    /// Image decoding failed
    #[error("Decode error for {photo_id}: {message}")]
    Decode { photo_id: String, message: String },

    /// Image format cannot be handled
    #[error("Unsupported format for {photo_id}: {format}")]
    UnsupportedFormat { photo_id: String, format: String },

    /// Image dimensions exceed limit
    #[error("Image too large: {photo_id} ({width}x{height} > {max_dim})")]
    ImageTooLarge {
        photo_id: String,
        width: u32,
        height: u32,
        max_dim: u32,
    },

    /// Encoding the derived raster failed
    #[error("Encode error for {photo_id}: {message}")]
    Encode { photo_id: String, message: String },

    /// Operation timed out
    #[error("Timeout in {stage} stage for {photo_id} after {timeout_ms}ms")]
    Timeout {
        photo_id: String,
        stage: String,
        timeout_ms: u64,
    },

    /// A blob store call failed
    #[error("Store failure in {stage} stage for {photo_id}: {source}")]
    Store {
        photo_id: String,
        stage: String,
        #[source]
        source: StoreError,
    },

    /// The attempt panicked outside the derive step
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// Scratch space for buffering the original failed
    #[error("Scratch error for {photo_id}: {source}")]
    Scratch {
        photo_id: String,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Whether redelivery cannot resolve this failure.
    pub fn is_permanent(&self) -> bool {
        match self {
            PipelineError::MalformedPayload(_)
            | PipelineError::PhotoNotFound(_)
            | PipelineError::OriginalTooLarge { .. }
            | PipelineError::Decode { .. }
            | PipelineError::UnsupportedFormat { .. }
            | PipelineError::ImageTooLarge { .. }
            | PipelineError::Encode { .. } => true,
            PipelineError::Timeout { .. }
            | PipelineError::Panicked(_)
            | PipelineError::Scratch { .. } => false,
            PipelineError::Store { source, .. } => !source.is_transient(),
        }
    }
}

/// Convenience type alias for thumbsmith results.
pub type Result<T> = std::result::Result<T, ThumbsmithError>;

/// Convenience type alias for pipeline-specific results.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
