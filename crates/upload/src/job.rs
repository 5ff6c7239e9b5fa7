//! Batch jobs: the unit of work derived from one manifest

use std::path::{Path, PathBuf};

use dropzone_core::{InFlightGuard, Manifest, ManifestLine};

/// Lifecycle of a batch job. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Running,
    Finalizing,
    Done,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Created => "CREATED",
            JobState::Running => "RUNNING",
            JobState::Finalizing => "FINALIZING",
            JobState::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// One dispatched manifest, owned by the worker executing it.
///
/// Holds the in-flight guard for its manifest path; the guard is released
/// during finalisation, or when the job is dropped without running.
#[derive(Debug)]
pub struct BatchJob {
    manifest_path: PathBuf,
    parent_dir: PathBuf,
    lines: Vec<ManifestLine>,
    guard: InFlightGuard,
}

impl BatchJob {
    /// Build a job from a complete manifest and the guard claimed for it
    pub fn new(manifest: Manifest, guard: InFlightGuard) -> Self {
        let (manifest_path, parent_dir, lines) = manifest.into_parts();
        Self {
            manifest_path,
            parent_dir,
            lines,
            guard,
        }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn parent_dir(&self) -> &Path {
        &self.parent_dir
    }

    pub fn lines(&self) -> &[ManifestLine] {
        &self.lines
    }

    /// Number of verification attempts this job will make
    pub fn entry_count(&self) -> usize {
        self.lines.len()
    }

    pub(crate) fn into_parts(self) -> (PathBuf, PathBuf, Vec<ManifestLine>, InFlightGuard) {
        (self.manifest_path, self.parent_dir, self.lines, self.guard)
    }
}
