//! In-flight guard: at most one running batch per manifest path
//!
//! Membership is taken with a single insert-if-absent on a concurrent
//! set, so two events racing on the same manifest cannot both win.
//! Winning hands back an [`InFlightGuard`] that removes the path again
//! when released or dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashSet;
use tracing::debug;

/// Concurrent set of manifest paths currently being processed
#[derive(Debug, Default)]
pub struct InFlightSet {
    paths: DashSet<PathBuf>,
}

impl InFlightSet {
    /// Create an empty, shareable set
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Atomically claim `path`.
    ///
    /// Returns `None` if the path is already in flight.
    pub fn try_acquire(self: &Arc<Self>, path: &Path) -> Option<InFlightGuard> {
        if self.paths.insert(path.to_path_buf()) {
            Some(InFlightGuard {
                set: Arc::clone(self),
                path: path.to_path_buf(),
                armed: true,
            })
        } else {
            None
        }
    }

    /// Whether `path` is currently claimed
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    /// Number of claimed paths
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Ownership of one manifest path in an [`InFlightSet`]
#[derive(Debug)]
pub struct InFlightGuard {
    set: Arc<InFlightSet>,
    path: PathBuf,
    armed: bool,
}

impl InFlightGuard {
    /// The claimed manifest path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the path from the set
    pub fn release(mut self) {
        self.remove();
    }

    /// Leave the path claimed forever.
    ///
    /// Used when finalisation could not remove the manifest: the path
    /// stays orphaned so later events for it are ignored.
    pub fn retain(mut self) {
        debug!(path = %self.path.display(), "In-flight claim retained");
        self.armed = false;
    }

    fn remove(&mut self) {
        if self.armed {
            self.set.paths.remove(&self.path);
            self.armed = false;
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.remove();
    }
}
