//! Batch execution for Dropzone
//!
//! This crate provides:
//! - The object store and metrics sink capabilities plus built-in implementations
//! - Batch jobs and the uploader that verifies, uploads and cleans them up
//! - Per-batch metrics reporting
//! - A fixed-size worker pool with drain/abandon shutdown

pub mod job;
pub mod metrics;
pub mod pool;
pub mod store;
pub mod uploader;

// Re-exports
pub use job::{BatchJob, JobState};
pub use metrics::{BatchTally, JsonLinesSink, LogSink, MetricsReporter, MetricsSink};
pub use pool::{JobSink, ShutdownMode, SubmitError, TaskHandle, WorkerPool};
pub use store::{DirectoryStore, ObjectStore, StoreError};
pub use uploader::{BatchUploader, EntryError, EntryOutcome};
