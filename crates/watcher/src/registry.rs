//! Directory registrations: watch handle <-> directory path

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Opaque identifier of one registered directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(u64);

/// Bidirectional map of registered directories
#[derive(Debug, Default)]
pub struct WatchRegistry {
    dirs: HashMap<WatchHandle, PathBuf>,
    handles: HashMap<PathBuf, WatchHandle>,
    next_id: u64,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `dir`, returning its handle and whether it was new
    pub fn insert(&mut self, dir: &Path) -> (WatchHandle, bool) {
        if let Some(&handle) = self.handles.get(dir) {
            return (handle, false);
        }
        let handle = WatchHandle(self.next_id);
        self.next_id += 1;
        self.dirs.insert(handle, dir.to_path_buf());
        self.handles.insert(dir.to_path_buf(), handle);
        (handle, true)
    }

    /// Forget `dir`, returning the handle it had
    pub fn remove_dir(&mut self, dir: &Path) -> Option<WatchHandle> {
        let handle = self.handles.remove(dir)?;
        self.dirs.remove(&handle);
        Some(handle)
    }

    pub fn handle_for(&self, dir: &Path) -> Option<WatchHandle> {
        self.handles.get(dir).copied()
    }

    pub fn dir_for(&self, handle: WatchHandle) -> Option<&Path> {
        self.dirs.get(&handle).map(PathBuf::as_path)
    }

    /// Registered directory that directly contains `path`
    pub fn owner_of(&self, path: &Path) -> Option<(WatchHandle, &Path)> {
        let handle = self.handle_for(path.parent()?)?;
        Some((handle, self.dir_for(handle)?))
    }

    pub fn contains(&self, dir: &Path) -> bool {
        self.handles.contains_key(dir)
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Registered directories in no particular order
    pub fn dirs(&self) -> impl Iterator<Item = &Path> {
        self.dirs.values().map(PathBuf::as_path)
    }
}
