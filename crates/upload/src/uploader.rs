//! Batch execution: verify, upload, delete, tally
//!
//! Entries of a batch are processed strictly in order on the calling
//! thread. A failing entry is counted and logged and never stops the rest
//! of the batch.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dropzone_core::{hash_file, AssetNameError, HashError, InFlightGuard, ManifestEntry, ManifestLine, Md5Digest};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

use crate::job::{BatchJob, JobState};
use crate::metrics::{BatchTally, MetricsReporter};
use crate::store::{ObjectStore, StoreError};

/// Why a single entry failed
#[derive(Debug, Error)]
pub enum EntryError {
    #[error("malformed manifest line {line_number}: {raw:?}")]
    Malformed { line_number: usize, raw: String },

    #[error(transparent)]
    AssetName(#[from] AssetNameError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error("upload of {key} failed: {source}")]
    Upload {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("uploaded but failed to delete {}: {source}", path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("entry processing panicked")]
    Panicked,
}

/// Result of processing one manifest entry
#[derive(Debug)]
pub enum EntryOutcome {
    /// Checksum matched, asset uploaded under `key` and deleted locally
    Uploaded { key: String },
    /// Digest differs from the declared checksum; asset left in place
    ChecksumMismatch { declared: String, actual: Md5Digest },
    /// Any other failure
    Failed(EntryError),
}

/// Executes batch jobs against the shared object store
pub struct BatchUploader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    reporter: MetricsReporter,
}

impl BatchUploader {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, reporter: MetricsReporter) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            reporter,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Run one job to completion and return its tally.
    ///
    /// After every entry has been attempted the manifest is deleted, the
    /// in-flight guard released and one metrics submission made.
    pub fn run(&self, job: BatchJob) -> BatchTally {
        let (manifest_path, parent_dir, lines, guard) = job.into_parts();
        let span = info_span!("batch", manifest = %manifest_path.display());
        let _enter = span.enter();

        debug!(state = %JobState::Running, entries = lines.len(), "Upload is starting");
        let mut tally = BatchTally::default();

        for line in &lines {
            match self.process_line(&parent_dir, line) {
                EntryOutcome::Uploaded { key } => {
                    tally.valid += 1;
                    info!(key = %key, "Asset pushed to object store and deleted");
                }
                EntryOutcome::ChecksumMismatch { declared, actual } => {
                    tally.failed += 1;
                    error!(
                        declared = %declared,
                        actual = %actual,
                        "Checksum mismatch, asset left in place"
                    );
                }
                EntryOutcome::Failed(e) => {
                    tally.failed += 1;
                    error!("Entry failed: {}", e);
                }
            }
        }

        debug!(state = %JobState::Finalizing, valid = tally.valid, failed = tally.failed);
        self.finalize(&manifest_path, guard, tally);
        debug!(state = %JobState::Done);

        tally
    }

    /// Process one parsed manifest line, containing panics to the entry
    pub fn process_line(&self, parent_dir: &Path, line: &ManifestLine) -> EntryOutcome {
        match line {
            ManifestLine::Malformed { line_number, raw } => EntryOutcome::Failed(EntryError::Malformed {
                line_number: *line_number,
                raw: raw.clone(),
            }),
            ManifestLine::Entry(entry) => {
                let _entry_span = info_span!("entry", file = %entry.file_name).entered();
                panic::catch_unwind(AssertUnwindSafe(|| self.process_entry(parent_dir, entry)))
                    .unwrap_or(EntryOutcome::Failed(EntryError::Panicked))
            }
        }
    }

    /// Verify, upload and delete a single asset
    pub fn process_entry(&self, parent_dir: &Path, entry: &ManifestEntry) -> EntryOutcome {
        let asset = match entry.asset_path(parent_dir) {
            Ok(asset) => asset,
            Err(e) => return EntryOutcome::Failed(e.into()),
        };

        // 1. Verify
        let digest = match hash_file(&asset) {
            Ok(digest) => digest,
            Err(e) => return EntryOutcome::Failed(e.into()),
        };
        if !digest.matches_hex(&entry.checksum) {
            return EntryOutcome::ChecksumMismatch {
                declared: entry.checksum.clone(),
                actual: digest,
            };
        }

        // 2. Upload
        let key = entry.object_key();
        if let Err(source) = self.store.put(&self.bucket, &key, &asset) {
            return EntryOutcome::Failed(EntryError::Upload { key, source });
        }

        // 3. Delete; a returned upload is not confirmed any further
        if let Err(source) = std::fs::remove_file(&asset) {
            return EntryOutcome::Failed(EntryError::Delete { path: asset, source });
        }

        EntryOutcome::Uploaded { key }
    }

    fn finalize(&self, manifest_path: &Path, guard: InFlightGuard, tally: BatchTally) {
        match std::fs::remove_file(manifest_path) {
            Ok(()) => {
                info!("Manifest has been deleted");
                guard.release();
            }
            Err(e) => {
                // The path stays claimed: no further attempts for this manifest
                warn!("Failed to delete manifest, path left orphaned: {}", e);
                guard.retain();
            }
        }

        self.reporter.report(tally);
    }
}

impl std::fmt::Debug for BatchUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchUploader")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}
