//! Fixed-size worker pool running batch jobs
//!
//! Jobs are handed over through a `crossbeam-channel` queue. With no
//! capacity the queue is unbounded and submission never blocks; with a
//! capacity, a full queue blocks the submitter until a worker frees a
//! slot. Every submission returns a [`TaskHandle`], and
//! [`WorkerPool::shutdown`] is the barrier that either drains or abandons
//! the backlog before joining the workers.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::job::BatchJob;
use crate::metrics::BatchTally;
use crate::uploader::BatchUploader;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("worker pool is shut down")]
    Closed,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// What happens to queued jobs at shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownMode {
    /// Run every queued job before stopping
    #[default]
    Drain,
    /// Finish running jobs, drop queued ones (guards released, files untouched)
    Abandon,
}

/// Anything that accepts batch jobs for asynchronous execution
pub trait JobSink: Send + Sync {
    fn enqueue(&self, job: BatchJob) -> Result<(), SubmitError>;
}

/// Completion handle for one submitted job
#[derive(Debug)]
pub struct TaskHandle {
    done: Receiver<BatchTally>,
}

impl TaskHandle {
    /// Block until the job finishes.
    ///
    /// `None` if the job was abandoned or its worker died.
    pub fn wait(self) -> Option<BatchTally> {
        self.done.recv().ok()
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Result<BatchTally, RecvTimeoutError> {
        self.done.recv_timeout(timeout)
    }
}

struct Task {
    job: BatchJob,
    done: Sender<BatchTally>,
}

/// Fixed-size pool of named worker threads
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Task>>>,
    backlog: Receiver<Task>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    abandon: Arc<AtomicBool>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers sharing `uploader`.
    ///
    /// `queue_capacity` of `None` gives an unbounded backlog.
    pub fn new(
        size: usize,
        queue_capacity: Option<usize>,
        uploader: Arc<BatchUploader>,
    ) -> Result<Self, SubmitError> {
        let size = size.max(1);
        let (sender, receiver) = match queue_capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };
        let abandon = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let receiver = receiver.clone();
            let uploader = Arc::clone(&uploader);
            let abandon = Arc::clone(&abandon);
            let handle = thread::Builder::new()
                .name(format!("dropzone-worker-{id}"))
                .spawn(move || worker_loop(id, receiver, uploader, abandon))?;
            workers.push(handle);
        }

        info!(workers = size, queue_capacity = ?queue_capacity, "Worker pool started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            backlog: receiver,
            workers: Mutex::new(workers),
            abandon,
            size,
        })
    }

    /// Queue a job and get a handle to its result
    pub fn submit(&self, job: BatchJob) -> Result<TaskHandle, SubmitError> {
        // Clone out of the lock so a full bounded queue never blocks shutdown
        let sender = self.sender.lock().clone().ok_or(SubmitError::Closed)?;
        let (done_tx, done_rx) = bounded(1);

        sender
            .send(Task { job, done: done_tx })
            .map_err(|_| SubmitError::Closed)?;

        Ok(TaskHandle { done: done_rx })
    }

    /// Number of jobs waiting for a worker
    pub fn backlog(&self) -> usize {
        self.backlog.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Stop accepting jobs and join every worker.
    ///
    /// Idempotent; later calls return immediately.
    pub fn shutdown(&self, mode: ShutdownMode) {
        if mode == ShutdownMode::Abandon {
            self.abandon.store(true, Ordering::SeqCst);
        }
        let closed = self.sender.lock().take().is_some();
        if closed {
            info!(mode = ?mode, backlog = self.backlog(), "Worker pool shutting down");
        }

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                error!("Worker thread panicked outside of a batch");
            }
        }
    }
}

impl JobSink for WorkerPool {
    fn enqueue(&self, job: BatchJob) -> Result<(), SubmitError> {
        self.submit(job).map(drop)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown(ShutdownMode::Drain);
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("backlog", &self.backlog())
            .finish_non_exhaustive()
    }
}

fn worker_loop(
    id: usize,
    receiver: Receiver<Task>,
    uploader: Arc<BatchUploader>,
    abandon: Arc<AtomicBool>,
) {
    debug!(worker = id, "Worker started");

    for task in receiver.iter() {
        if abandon.load(Ordering::SeqCst) {
            warn!(
                worker = id,
                manifest = %task.job.manifest_path().display(),
                "Abandoning queued batch at shutdown"
            );
            continue;
        }

        let manifest = task.job.manifest_path().to_path_buf();
        match panic::catch_unwind(AssertUnwindSafe(|| uploader.run(task.job))) {
            Ok(tally) => {
                // The submitter may have dropped its handle
                let _ = task.done.send(tally);
            }
            Err(_) => {
                error!(worker = id, manifest = %manifest.display(), "Batch panicked");
            }
        }
    }

    debug!(worker = id, "Worker stopped");
}
