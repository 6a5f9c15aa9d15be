//! Thumbnail pipeline components.
//!
//! This module contains the stages a single processing task goes through:
//! - **state**: the per-task state machine
//! - **buffer**: buffering the original, spilling large ones to scratch files
//! - **thumbnail**: decode, resize and encode on a blocking thread
//! - **linker**: conditional link-back of `thumbId` onto the photo record
//! - **workflow**: drives one task attempt through every stage
//! - **retry**: requeue-or-discard decisions with exponential backoff
//! - **report**: failure reports for discarded tasks

pub mod buffer;
pub mod linker;
pub mod report;
pub mod retry;
pub mod state;
pub mod thumbnail;
pub mod workflow;

// Re-exports for convenient access
pub use buffer::{Buffering, OriginalBuffer};
pub use linker::{LinkOutcome, MetadataLinker};
pub use report::{CollectingSink, FailureReport, JsonlSink, LogSink, ReportSink};
pub use retry::{Disposition, RetryPolicy};
pub use state::{TaskMachine, TaskState};
pub use thumbnail::{DerivedImage, Deriver, ThumbnailGenerator};
pub use workflow::{TaskOutcome, Workflow};
