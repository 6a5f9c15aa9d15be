//! The thumbnail worker: a long-lived consumer of the processing topic.
//!
//! The consumer loop takes a concurrency permit before pulling each delivery
//! and spawns one tokio task per delivery. Each task runs the workflow once
//! and settles its delivery: acknowledged when the photo is done or the
//! failure is permanent, requeued with backoff when it is transient. A panic
//! inside an attempt is caught and settled like a transient failure, so it
//! escalates after the configured number of attempts.
//!
//! Shared handles (store, queue, report sink) travel in a [`WorkerContext`]
//! owned by the running worker and released when it stops.

use futures_util::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use crate::config::Config;
use crate::error::{PipelineError, QueueError};
use crate::pipeline::{
    Deriver, Disposition, FailureReport, LogSink, ReportSink, RetryPolicy, TaskOutcome,
    TaskState, ThumbnailGenerator, Workflow,
};
use crate::queue::{Delivery, QueueChannel, Subscription};
use crate::store::BlobStore;
use crate::types::ProcessingTask;

/// Connection handles the worker needs, acquired by the caller.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn BlobStore>,
    pub queue: Arc<dyn QueueChannel>,
    pub reports: Arc<dyn ReportSink>,
}

impl WorkerContext {
    /// Context that reports failures to the log.
    pub fn new(store: Arc<dyn BlobStore>, queue: Arc<dyn QueueChannel>) -> Self {
        Self {
            store,
            queue,
            reports: Arc::new(LogSink),
        }
    }

    pub fn with_reports(mut self, reports: Arc<dyn ReportSink>) -> Self {
        self.reports = reports;
        self
    }
}

/// Counters for deliveries a worker has settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Thumbnails derived, stored and linked
    pub completed: u64,
    /// Photos that already had a thumbnail
    pub skipped: u64,
    /// Photos linked by a concurrent attempt; our thumbnail is orphaned
    pub superseded: u64,
    /// Deliveries put back for another attempt
    pub requeued: u64,
    /// Deliveries discarded with a failure report
    pub failed: u64,
}

impl WorkerStats {
    /// Deliveries acknowledged.
    pub fn acked(&self) -> u64 {
        self.completed + self.skipped + self.superseded + self.failed
    }
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    skipped: AtomicU64,
    superseded: AtomicU64,
    requeued: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            completed: self.completed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// A configured, not yet running, thumbnail worker.
pub struct ThumbnailWorker {
    context: WorkerContext,
    workflow: Workflow,
    topic: String,
}

impl ThumbnailWorker {
    /// Create a worker that derives thumbnails with the configured generator.
    pub fn new(config: &Config, context: WorkerContext) -> Self {
        let generator = ThumbnailGenerator::new(config.thumbnail.clone(), &config.limits);
        Self::with_deriver(config, context, Arc::new(generator))
    }

    /// Create a worker with a custom derive step.
    pub fn with_deriver(
        config: &Config,
        context: WorkerContext,
        deriver: Arc<dyn Deriver>,
    ) -> Self {
        Self {
            workflow: Workflow::new(config, context.store.clone(), deriver),
            context,
            topic: config.queue.topic.clone(),
        }
    }

    /// Subscribe to the topic and start the consumer loop.
    ///
    /// At most `concurrency` tasks run at once; failures are settled
    /// according to `retry`.
    pub async fn start(
        self,
        concurrency: usize,
        retry: RetryPolicy,
    ) -> Result<WorkerHandle, QueueError> {
        let subscription = self.context.queue.consume(&self.topic).await?;
        let concurrency = concurrency.max(1);
        tracing::info!(
            topic = %self.topic,
            concurrency,
            max_attempts = retry.max_attempts,
            "Thumbnail worker started"
        );

        let shared = Arc::new(Shared {
            workflow: self.workflow,
            reports: self.context.reports.clone(),
            retry,
            counters: Counters::default(),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(consume(
            self.context,
            subscription,
            shared.clone(),
            Arc::new(Semaphore::new(concurrency)),
            shutdown_rx,
        ));

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join,
            shared,
        })
    }
}

/// A running worker.
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    shared: Arc<Shared>,
}

impl WorkerHandle {
    /// Counters so far.
    pub fn stats(&self) -> WorkerStats {
        self.shared.counters.snapshot()
    }

    /// Stop taking deliveries, wait for in-flight tasks to settle, release
    /// the context, flush the report sink and return the final counters.
    pub async fn stop(self) -> WorkerStats {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            tracing::error!("Worker consumer loop panicked: {e}");
        }
        let reports = self.shared.reports.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || reports.flush()).await {
            tracing::error!("Flushing failure reports panicked: {e}");
        }
        let stats = self.shared.counters.snapshot();
        tracing::info!(
            completed = stats.completed,
            skipped = stats.skipped,
            superseded = stats.superseded,
            requeued = stats.requeued,
            failed = stats.failed,
            "Thumbnail worker stopped"
        );
        stats
    }
}

struct Shared {
    workflow: Workflow,
    reports: Arc<dyn ReportSink>,
    retry: RetryPolicy,
    counters: Counters,
}

impl Shared {
    /// Run one delivery to a settled state.
    async fn handle(&self, delivery: Delivery) {
        let attempt = delivery.attempt();
        let caught = AssertUnwindSafe(self.workflow.run(delivery.payload()))
            .catch_unwind()
            .await;
        let outcome = match caught {
            Ok(outcome) => outcome,
            Err(panic) => TaskOutcome::Failed {
                photo_id: ProcessingTask::from_payload(delivery.payload())
                    .ok()
                    .map(|task| task.photo_id),
                state: TaskState::Failed,
                error: PipelineError::Panicked(panic_message(panic.as_ref())),
            },
        };
        match outcome {
            TaskOutcome::Completed { .. } => {
                bump(&self.counters.completed);
                delivery.ack();
            }
            TaskOutcome::AlreadyComplete { .. } => {
                bump(&self.counters.skipped);
                delivery.ack();
            }
            TaskOutcome::Superseded { .. } => {
                bump(&self.counters.superseded);
                delivery.ack();
            }
            TaskOutcome::Failed {
                photo_id,
                state,
                error,
            } => match self.retry.disposition(attempt, &error) {
                Disposition::Requeue { delay } => {
                    tracing::warn!(
                        tag = delivery.tag(),
                        photo_id = ?photo_id.as_ref().map(|id| id.as_str()),
                        %state,
                        attempt,
                        ?delay,
                        "Task failed, requeueing: {error}"
                    );
                    bump(&self.counters.requeued);
                    delivery.requeue(delay);
                }
                Disposition::Discard { escalated } => {
                    bump(&self.counters.failed);
                    self.reports.report(&FailureReport::new(
                        photo_id.map(String::from),
                        state,
                        attempt,
                        escalated,
                        error.to_string(),
                    ));
                    delivery.ack();
                }
            },
        }
    }
}

async fn consume(
    context: WorkerContext,
    mut subscription: Subscription,
    shared: Arc<Shared>,
    semaphore: Arc<Semaphore>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tasks: JoinSet<()> = JoinSet::new();

    loop {
        let permit = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let delivery = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                reap(joined, &shared);
                continue;
            }
            next = subscription.next() => match next {
                Some(delivery) => delivery,
                None => {
                    tracing::info!(topic = subscription.topic(), "Subscription closed");
                    break;
                }
            },
        };

        let shared = shared.clone();
        tasks.spawn(async move {
            shared.handle(delivery).await;
            drop(permit);
        });
    }

    tracing::debug!(in_flight = tasks.len(), "Draining in-flight tasks");
    while let Some(joined) = tasks.join_next().await {
        reap(joined, &shared);
    }
    drop(subscription);
    drop(context);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn reap(joined: Result<(), JoinError>, shared: &Shared) {
    if let Err(e) = joined {
        // Settling itself panicked; the delivery was dropped unsettled and requeued.
        tracing::error!("Task panicked: {e}");
        bump(&shared.counters.requeued);
    }
}
