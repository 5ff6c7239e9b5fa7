//! Completion detection and hand-off to the worker pool
//!
//! A modified file becomes a batch when, in order:
//! 1. its extension is the completion suffix,
//! 2. its path is not already in flight,
//! 3. it still exists,
//! 4. it reads as a manifest whose last line is the sentinel.
//!
//! Steps 2 and the claim are one insert-if-absent. The claim is made
//! before the manifest is read and dropped again if steps 3-4 fail.

use std::path::Path;
use std::sync::Arc;

use dropzone_core::{InFlightSet, Manifest, ManifestError};
use dropzone_upload::{BatchJob, JobSink, JobState};
use tracing::{debug, error, info, warn};

/// What the dispatcher did with one modify event
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A job was handed to the pool
    Dispatched,
    /// Not a completion marker
    NotAManifest,
    /// A job for this manifest is already running or queued
    AlreadyInFlight,
    /// The file disappeared before it could be read
    Vanished,
    /// The file could not be read or is not complete yet
    NotReady(ManifestError),
    /// The pool refused the job
    Refused,
}

impl DispatchOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, DispatchOutcome::Dispatched)
    }
}

/// Turns completed manifests into batch jobs
pub struct Dispatcher {
    suffix: String,
    inflight: Arc<InFlightSet>,
    jobs: Arc<dyn JobSink>,
}

impl Dispatcher {
    /// `suffix` is the completion-marker extension, with or without the dot
    pub fn new(suffix: &str, inflight: Arc<InFlightSet>, jobs: Arc<dyn JobSink>) -> Self {
        Self {
            suffix: suffix.trim_start_matches('.').to_string(),
            inflight,
            jobs,
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn inflight(&self) -> &Arc<InFlightSet> {
        &self.inflight
    }

    /// Whether `path` carries the completion suffix
    pub fn is_manifest(&self, path: &Path) -> bool {
        path.extension().and_then(|ext| ext.to_str()) == Some(self.suffix.as_str())
    }

    /// Handle a modify event for `path`
    pub fn on_modify(&self, path: &Path) -> DispatchOutcome {
        if !self.is_manifest(path) {
            return DispatchOutcome::NotAManifest;
        }

        let Some(guard) = self.inflight.try_acquire(path) else {
            debug!(manifest = %path.display(), "Manifest already in flight");
            return DispatchOutcome::AlreadyInFlight;
        };

        // Dropping the guard on any early return undoes the claim
        if !path.exists() {
            debug!(manifest = %path.display(), "Manifest vanished before it could be read");
            return DispatchOutcome::Vanished;
        }

        let manifest = match Manifest::read(path) {
            Ok(manifest) => manifest,
            Err(e @ ManifestError::MissingSentinel { .. }) => {
                // Normal while the producer is still writing
                debug!("{}", e);
                return DispatchOutcome::NotReady(e);
            }
            Err(e) => {
                warn!("{}", e);
                return DispatchOutcome::NotReady(e);
            }
        };

        info!(
            manifest = %path.display(),
            entries = manifest.lines().len(),
            "Manifest has been received"
        );

        let job = BatchJob::new(manifest, guard);
        debug!(state = %JobState::Created, manifest = %path.display());

        match self.jobs.enqueue(job) {
            Ok(()) => DispatchOutcome::Dispatched,
            Err(e) => {
                error!(manifest = %path.display(), "Failed to dispatch batch: {}", e);
                DispatchOutcome::Refused
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("suffix", &self.suffix)
            .field("in_flight", &self.inflight.len())
            .finish_non_exhaustive()
    }
}
