//! The per-task workflow run by the thumbnail worker.
//!
//! One attempt at one task: parse the payload, then walk the state machine
//! `Fetching → Deriving → Storing → Linking → Done`. Every store call and the
//! derive step are bounded by their configured timeout. The workflow never
//! touches the queue; it returns a [`TaskOutcome`] and the worker decides
//! whether to acknowledge or requeue.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::buffer::{Buffering, OriginalBuffer};
use super::linker::{LinkOutcome, MetadataLinker};
use super::state::{TaskMachine, TaskState};
use super::thumbnail::{DerivedImage, Deriver};
use crate::config::{BucketConfig, Config, TimeoutConfig};
use crate::error::{PipelineError, PipelineResult, StoreError};
use crate::store::{BlobStore, ObjectId};
use crate::types::{Dimensions, Photo, ProcessingTask, Thumbnail};

/// How one task attempt ended.
#[derive(Debug)]
pub enum TaskOutcome {
    /// Thumbnail derived, stored and linked.
    Completed {
        photo_id: ObjectId,
        thumb_id: ObjectId,
        dimensions: Dimensions,
    },
    /// The photo already had a thumbnail; nothing was written.
    AlreadyComplete {
        photo_id: ObjectId,
        thumb_id: ObjectId,
    },
    /// Another attempt linked first. The thumbnail stored by this attempt is
    /// an orphan.
    Superseded {
        photo_id: ObjectId,
        linked: String,
        orphan: ObjectId,
    },
    /// The attempt failed in `state`.
    Failed {
        photo_id: Option<ObjectId>,
        state: TaskState,
        error: PipelineError,
    },
}

impl TaskOutcome {
    /// Whether the photo has a linked thumbnail after this attempt.
    pub fn is_done(&self) -> bool {
        !matches!(self, TaskOutcome::Failed { .. })
    }
}

/// Drives single task attempts against a blob store.
pub struct Workflow {
    store: Arc<dyn BlobStore>,
    deriver: Arc<dyn Deriver>,
    linker: MetadataLinker,
    buckets: BucketConfig,
    timeouts: TimeoutConfig,
    buffering: Buffering,
}

impl Workflow {
    pub fn new(config: &Config, store: Arc<dyn BlobStore>, deriver: Arc<dyn Deriver>) -> Self {
        Self {
            linker: MetadataLinker::new(store.clone(), config.buckets.originals.clone()),
            store,
            deriver,
            buckets: config.buckets.clone(),
            timeouts: config.timeouts.clone(),
            buffering: Buffering::new(&config.limits, config.scratch_dir()),
        }
    }

    /// Run one attempt for the task carried by `payload`.
    pub async fn run(&self, payload: &[u8]) -> TaskOutcome {
        let task = match ProcessingTask::from_payload(payload) {
            Ok(task) => task,
            Err(message) => {
                return TaskOutcome::Failed {
                    photo_id: None,
                    state: TaskState::Fetching,
                    error: PipelineError::MalformedPayload(message),
                }
            }
        };

        let mut machine = TaskMachine::new();
        match self.drive(&task.photo_id, &mut machine).await {
            Ok(outcome) => outcome,
            Err(error) => {
                let state = machine.state();
                machine.fail();
                TaskOutcome::Failed {
                    photo_id: Some(task.photo_id),
                    state,
                    error,
                }
            }
        }
    }

    async fn drive(
        &self,
        photo_id: &ObjectId,
        machine: &mut TaskMachine,
    ) -> PipelineResult<TaskOutcome> {
        let photo = self.fetch_photo(photo_id).await?;
        if let Some(thumb_id) = photo.thumb_id {
            machine.advance(TaskState::Done);
            tracing::info!(%photo_id, %thumb_id, "Photo already has a thumbnail, skipping");
            return Ok(TaskOutcome::AlreadyComplete {
                photo_id: photo_id.clone(),
                thumb_id,
            });
        }
        let original = self.fetch_original(photo_id).await?;
        tracing::debug!(
            %photo_id,
            bytes = original.len(),
            spilled = original.scratch_path().is_some(),
            "Fetched original"
        );

        machine.advance(TaskState::Deriving);
        let derived = self.derive(photo_id, original).await?;
        tracing::debug!(
            %photo_id,
            source = %derived.source_dimensions,
            bytes = derived.bytes.len(),
            "Derived thumbnail"
        );

        machine.advance(TaskState::Storing);
        let dimensions = derived.dimensions;
        let thumb_id = self.store_thumbnail(photo_id, derived).await?;

        machine.advance(TaskState::Linking);
        let linked = bounded(
            photo_id,
            TaskState::Linking,
            self.timeouts.link(),
            async {
                self.linker
                    .link(photo_id, &thumb_id, Some(dimensions))
                    .await
                    .map_err(|source| store_error(photo_id, TaskState::Linking, source))
            },
        )
        .await?;

        let outcome = match linked {
            LinkOutcome::Linked | LinkOutcome::AlreadyLinked => {
                tracing::info!(%photo_id, %thumb_id, %dimensions, "Thumbnail linked");
                TaskOutcome::Completed {
                    photo_id: photo_id.clone(),
                    thumb_id,
                    dimensions,
                }
            }
            LinkOutcome::Conflict { existing } => {
                tracing::warn!(
                    %photo_id,
                    linked = %existing,
                    orphan = %thumb_id,
                    "Photo was linked by another attempt, leaving orphaned thumbnail"
                );
                TaskOutcome::Superseded {
                    photo_id: photo_id.clone(),
                    linked: existing,
                    orphan: thumb_id,
                }
            }
            LinkOutcome::PhotoMissing => {
                return Err(PipelineError::PhotoNotFound(photo_id.to_string()));
            }
        };
        machine.advance(TaskState::Done);
        Ok(outcome)
    }

    async fn fetch_photo(&self, photo_id: &ObjectId) -> PipelineResult<Photo> {
        let bucket = &self.buckets.originals;
        let meta = bounded(photo_id, TaskState::Fetching, self.timeouts.fetch(), async {
            self.store
                .metadata(bucket, photo_id)
                .await
                .map_err(|source| store_error(photo_id, TaskState::Fetching, source))
        })
        .await?
        .ok_or_else(|| PipelineError::PhotoNotFound(photo_id.to_string()))?;

        Photo::from_metadata(bucket, photo_id.clone(), &meta)
            .map_err(|source| store_error(photo_id, TaskState::Fetching, source))
    }

    async fn fetch_original(&self, photo_id: &ObjectId) -> PipelineResult<OriginalBuffer> {
        bounded(photo_id, TaskState::Fetching, self.timeouts.fetch(), async {
            let stream = self
                .store
                .open_read_stream(&self.buckets.originals, photo_id)
                .await
                .map_err(|source| match source {
                    StoreError::NotFound { .. } => {
                        PipelineError::PhotoNotFound(photo_id.to_string())
                    }
                    other => store_error(photo_id, TaskState::Fetching, other),
                })?;
            self.buffering.drain(photo_id, stream).await
        })
        .await
    }

    async fn derive(
        &self,
        photo_id: &ObjectId,
        original: OriginalBuffer,
    ) -> PipelineResult<DerivedImage> {
        let deriver = self.deriver.clone();
        let id = photo_id.clone();
        let mut handle = tokio::task::spawn_blocking(move || deriver.derive(&id, &original));

        let limit = self.timeouts.derive();
        let joined = match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                // A blocking decode cannot be cancelled. The attempt settles
                // only after it has returned and released the original.
                tracing::warn!(
                    %photo_id,
                    timeout_ms = limit.as_millis() as u64,
                    "Derive timed out, waiting for the decode to finish"
                );
                let _ = handle.await;
                return Err(timeout_error(photo_id, TaskState::Deriving, limit));
            }
        };
        joined.map_err(|e| PipelineError::Decode {
            photo_id: photo_id.to_string(),
            message: format!("Derive task failed: {e}"),
        })?
    }

    async fn store_thumbnail(
        &self,
        photo_id: &ObjectId,
        derived: DerivedImage,
    ) -> PipelineResult<ObjectId> {
        let metadata = Thumbnail::new_metadata(photo_id, &derived.content_type, derived.dimensions);
        bounded(photo_id, TaskState::Storing, self.timeouts.store(), async {
            self.store
                .store(&self.buckets.thumbnails, derived.bytes, metadata)
                .await
                .map_err(|source| store_error(photo_id, TaskState::Storing, source))
        })
        .await
    }
}

/// Bound `fut` by `limit`, mapping expiry to a stage timeout.
async fn bounded<T>(
    photo_id: &ObjectId,
    state: TaskState,
    limit: Duration,
    fut: impl Future<Output = PipelineResult<T>>,
) -> PipelineResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(timeout_error(photo_id, state, limit)),
    }
}

fn timeout_error(photo_id: &ObjectId, state: TaskState, limit: Duration) -> PipelineError {
    PipelineError::Timeout {
        photo_id: photo_id.to_string(),
        stage: state.as_str().to_string(),
        timeout_ms: limit.as_millis() as u64,
    }
}

fn store_error(photo_id: &ObjectId, state: TaskState, source: StoreError) -> PipelineError {
    PipelineError::Store {
        photo_id: photo_id.to_string(),
        stage: state.as_str().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ThumbnailGenerator;
    use crate::store::{read_to_end, MemoryBlobStore};
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(width, height)
            .write_to(&mut buffer, ImageFormat::Jpeg)
            .unwrap();
        buffer.into_inner()
    }

    struct Fixture {
        store: Arc<MemoryBlobStore>,
        workflow: Workflow,
        _scratch: tempfile::TempDir,
    }

    fn fixture_with(config: Config, deriver: Option<Arc<dyn Deriver>>) -> Fixture {
        let scratch = tempfile::tempdir().unwrap();
        let mut config = config;
        config.general.scratch_dir = scratch.path().to_path_buf();
        let store = Arc::new(MemoryBlobStore::new());
        let deriver: Arc<dyn Deriver> = match deriver {
            Some(deriver) => deriver,
            None => Arc::new(ThumbnailGenerator::new(
                config.thumbnail.clone(),
                &config.limits,
            )),
        };
        let workflow = Workflow::new(&config, store.clone(), deriver);
        Fixture {
            store,
            workflow,
            _scratch: scratch,
        }
    }

    fn expect_failed(outcome: TaskOutcome) -> (Option<ObjectId>, TaskState, PipelineError) {
        match outcome {
            TaskOutcome::Failed {
                photo_id,
                state,
                error,
            } => (photo_id, state, error),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Config::default(), None)
    }

    async fn upload(store: &MemoryBlobStore, bytes: Vec<u8>) -> ObjectId {
        store
            .store("originals", bytes, Photo::new_metadata("image/jpeg", "u1"))
            .await
            .unwrap()
    }

    async fn photo(store: &MemoryBlobStore, id: &ObjectId) -> Photo {
        let meta = store.metadata("originals", id).await.unwrap().unwrap();
        Photo::from_metadata("originals", id.clone(), &meta).unwrap()
    }

    #[tokio::test]
    async fn test_completes_and_links() {
        let f = fixture();
        let photo_id = upload(&f.store, jpeg(300, 200)).await;

        let outcome = f.workflow.run(photo_id.as_str().as_bytes()).await;
        let (thumb_id, dimensions) = match outcome {
            TaskOutcome::Completed {
                thumb_id,
                dimensions,
                ..
            } => (thumb_id, dimensions),
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_eq!(
            dimensions,
            Dimensions {
                width: 100,
                height: 100
            }
        );

        let linked = photo(&f.store, &photo_id).await;
        assert_eq!(linked.thumb_id, Some(thumb_id.clone()));
        assert_eq!(linked.dimensions, Some(dimensions));

        let meta = f
            .store
            .metadata("thumbnails", &thumb_id)
            .await
            .unwrap()
            .unwrap();
        let thumb = Thumbnail::from_metadata("thumbnails", thumb_id.clone(), &meta).unwrap();
        assert_eq!(thumb.source_photo_id, photo_id);
        assert_eq!(thumb.content_type, "image/jpeg");

        let bytes = read_to_end(
            f.store
                .open_read_stream("thumbnails", &thumb_id)
                .await
                .unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(image::load_from_memory(&bytes).unwrap().width(), 100);
    }

    #[tokio::test]
    async fn test_second_run_is_already_complete_without_writes() {
        let f = fixture();
        let photo_id = upload(&f.store, jpeg(50, 50)).await;

        assert!(f.workflow.run(photo_id.as_str().as_bytes()).await.is_done());
        let calls = f.store.store_calls();

        let outcome = f.workflow.run(photo_id.as_str().as_bytes()).await;
        assert!(matches!(outcome, TaskOutcome::AlreadyComplete { .. }));
        assert_eq!(f.store.store_calls(), calls);
        assert_eq!(f.store.object_count("thumbnails"), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let f = fixture();
        let outcome = f.workflow.run(b"hello").await;
        let (photo_id, state, error) = expect_failed(outcome);
        assert!(photo_id.is_none());
        assert_eq!(state, TaskState::Fetching);
        assert!(matches!(error, PipelineError::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn test_unknown_photo_is_permanent() {
        let f = fixture();
        let outcome = f.workflow.run(ObjectId::generate().as_str().as_bytes()).await;
        let (_, state, error) = expect_failed(outcome);
        assert_eq!(state, TaskState::Fetching);
        assert!(matches!(error, PipelineError::PhotoNotFound(_)));
        assert!(error.is_permanent());
        assert_eq!(f.store.object_count("thumbnails"), 0);
    }

    #[tokio::test]
    async fn test_corrupt_original_fails_in_deriving() {
        let f = fixture();
        let photo_id = upload(&f.store, b"not an image at all".to_vec()).await;

        let outcome = f.workflow.run(photo_id.as_str().as_bytes()).await;
        let (_, state, error) = expect_failed(outcome);
        assert_eq!(state, TaskState::Deriving);
        assert!(error.is_permanent());
        assert!(!photo(&f.store, &photo_id).await.is_processed());
    }

    #[tokio::test]
    async fn test_store_failure_is_transient() {
        let f = fixture();
        let photo_id = upload(&f.store, jpeg(40, 40)).await;
        f.store.fail_next_stores(1);

        let outcome = f.workflow.run(photo_id.as_str().as_bytes()).await;
        let (_, state, error) = expect_failed(outcome);
        assert_eq!(state, TaskState::Storing);
        assert!(!error.is_permanent());

        // Retry from scratch succeeds.
        assert!(f.workflow.run(photo_id.as_str().as_bytes()).await.is_done());
    }

    #[tokio::test]
    async fn test_link_failure_is_transient() {
        let f = fixture();
        let photo_id = upload(&f.store, jpeg(40, 40)).await;
        f.store.fail_next_patches(1);

        let outcome = f.workflow.run(photo_id.as_str().as_bytes()).await;
        let (_, state, error) = expect_failed(outcome);
        assert_eq!(state, TaskState::Linking);
        assert!(!error.is_permanent());
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let mut config = Config::default();
        config.timeouts.fetch_ms = 10;
        let f = fixture_with(config, None);
        let photo_id = upload(&f.store, jpeg(40, 40)).await;
        f.store.set_read_delay(Duration::from_millis(200));

        let outcome = f.workflow.run(photo_id.as_str().as_bytes()).await;
        let (_, state, error) = expect_failed(outcome);
        assert_eq!(state, TaskState::Fetching);
        assert!(matches!(error, PipelineError::Timeout { .. }));
        assert!(!error.is_permanent());
    }

    #[derive(Default)]
    struct SlowDeriver {
        finished: std::sync::atomic::AtomicBool,
    }

    impl Deriver for SlowDeriver {
        fn derive(
            &self,
            photo_id: &ObjectId,
            _original: &OriginalBuffer,
        ) -> PipelineResult<DerivedImage> {
            std::thread::sleep(Duration::from_millis(200));
            self.finished
                .store(true, std::sync::atomic::Ordering::SeqCst);
            Err(PipelineError::Encode {
                photo_id: photo_id.to_string(),
                message: "too slow".into(),
            })
        }
    }

    #[tokio::test]
    async fn test_derive_timeout_is_transient() {
        let mut config = Config::default();
        config.timeouts.derive_ms = 20;
        let deriver = Arc::new(SlowDeriver::default());
        let f = fixture_with(config, Some(deriver.clone()));
        let photo_id = upload(&f.store, jpeg(40, 40)).await;

        let outcome = f.workflow.run(photo_id.as_str().as_bytes()).await;
        let (_, state, error) = expect_failed(outcome);
        assert_eq!(state, TaskState::Deriving);
        assert!(matches!(error, PipelineError::Timeout { .. }));
        assert!(!error.is_permanent());
        // The attempt only settles once the decode has returned.
        assert!(deriver.finished.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_photo_removed_before_link_is_permanent() {
        let f = fixture();
        let photo_id = upload(&f.store, jpeg(40, 40)).await;

        struct RemovingDeriver {
            store: Arc<MemoryBlobStore>,
            inner: ThumbnailGenerator,
        }
        impl Deriver for RemovingDeriver {
            fn derive(
                &self,
                photo_id: &ObjectId,
                original: &OriginalBuffer,
            ) -> PipelineResult<DerivedImage> {
                self.store.remove("originals", photo_id);
                self.inner.derive(photo_id, original)
            }
        }

        let config = Config::default();
        let deriver = RemovingDeriver {
            store: f.store.clone(),
            inner: ThumbnailGenerator::new(config.thumbnail.clone(), &config.limits),
        };
        let workflow = Workflow::new(&config, f.store.clone(), Arc::new(deriver));

        let outcome = workflow.run(photo_id.as_str().as_bytes()).await;
        let (_, state, error) = expect_failed(outcome);
        assert_eq!(state, TaskState::Linking);
        assert!(matches!(error, PipelineError::PhotoNotFound(_)));
    }
}
