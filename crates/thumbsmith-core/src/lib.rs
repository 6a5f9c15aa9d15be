//! Thumbsmith Core - asynchronous thumbnail pipeline.
//!
//! Uploads are stored as originals in a blob store and their ids are handed
//! to a background worker over a queue. The worker derives a fixed-size
//! thumbnail for each photo, stores it, and links it back onto the photo's
//! metadata record with a conditional update.
//!
//! # Architecture
//!
//! ```text
//! Ingestor → Queue → Worker → Fetch → Derive → Store → Link → ack
//!                      ▲                                  │
//!                      └──────── requeue (transient) ─────┘
//! ```
//!
//! Delivery is at-least-once. A photo that already has a thumbnail is
//! acknowledged without any writes, and the link never replaces an existing
//! `thumbId`, so redelivery cannot produce two linked thumbnails.
//!
//! # Usage
//!
//! ```rust,ignore
//! use thumbsmith_core::{Config, LogSink, Thumbsmith};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> thumbsmith_core::Result<()> {
//!     let config = Config::load()?;
//!     let thumbsmith = Thumbsmith::open(config).await?;
//!
//!     let worker = thumbsmith.start_worker(Arc::new(LogSink)).await?;
//!     let id = thumbsmith.ingestor().upload(bytes, "image/jpeg", "user-1").await?;
//!     thumbsmith.wait_idle().await;
//!     let stats = worker.stop().await;
//!
//!     let thumb = thumbsmith.catalog().thumbnail_for(&id).await?;
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod catalog;
pub mod config;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod queue;
pub mod store;
pub mod types;
pub mod worker;

// Re-exports for convenient access
pub use catalog::Catalog;
pub use config::Config;
pub use error::{
    ConfigError, IngestError, PipelineError, PipelineResult, QueueError, Result, StoreError,
    ThumbsmithError,
};
pub use ingest::{DiscoveredFile, FileDiscovery, Ingestor};
pub use pipeline::{
    CollectingSink, FailureReport, JsonlSink, LogSink, ReportSink, RetryPolicy, TaskOutcome,
    TaskState,
};
pub use queue::{MemoryQueue, QueueChannel};
pub use store::{BlobStore, FsBlobStore, MemoryBlobStore, ObjectId};
pub use types::{Dimensions, Photo, ProcessingTask, Thumbnail};
pub use worker::{ThumbnailWorker, WorkerContext, WorkerHandle, WorkerStats};

use std::sync::Arc;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Thumbsmith - the main entry point wiring a store, a queue and the worker.
///
/// The queue is in-process, so uploads and the worker must share one
/// `Thumbsmith` instance.
pub struct Thumbsmith {
    config: Config,
    store: Arc<dyn BlobStore>,
    queue: MemoryQueue,
}

impl Thumbsmith {
    /// Open the filesystem store under the configured `store_dir`.
    pub async fn open(config: Config) -> Result<Self> {
        tracing::debug!("Initializing Thumbsmith v{}", VERSION);
        let store = FsBlobStore::open(config.store_dir()).await?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Use an existing blob store.
    pub fn with_store(config: Config, store: Arc<dyn BlobStore>) -> Self {
        Self {
            config,
            store,
            queue: MemoryQueue::new(),
        }
    }

    /// Get a reference to the current configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn BlobStore> {
        self.store.clone()
    }

    pub fn queue(&self) -> &MemoryQueue {
        &self.queue
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(&self.config, self.store.clone(), Arc::new(self.queue.clone()))
    }

    pub fn catalog(&self) -> Catalog {
        Catalog::new(self.store.clone(), self.config.buckets.clone())
    }

    /// Start a worker on the processing topic with the configured
    /// concurrency and retry policy.
    pub async fn start_worker(&self, reports: Arc<dyn ReportSink>) -> Result<WorkerHandle> {
        let context = WorkerContext::new(self.store.clone(), Arc::new(self.queue.clone()))
            .with_reports(reports);
        let worker = ThumbnailWorker::new(&self.config, context);
        let handle = worker
            .start(
                self.config.worker.concurrency,
                RetryPolicy::from(&self.config.retry),
            )
            .await?;
        Ok(handle)
    }

    /// Wait until every enqueued task has been acknowledged.
    pub async fn wait_idle(&self) {
        self.queue.wait_idle(&self.config.queue.topic).await;
    }
}
