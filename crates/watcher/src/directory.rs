//! Directory tree watching and the event loop

use std::path::Path;

use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::dispatch::Dispatcher;
use crate::error::WatchError;
use crate::event::{FsEvent, FsEventKind};
use crate::registry::{WatchHandle, WatchRegistry};
use crate::source::EventSource;

/// Why [`DirectoryWatcher::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The event source was stopped or went away
    SourceClosed,
    /// Every watched directory has been removed
    NoDirectoriesLeft,
}

/// Watches a directory (optionally its whole tree) for completed manifests
pub struct DirectoryWatcher<S: EventSource> {
    source: S,
    registry: WatchRegistry,
    recursive: bool,
    dispatcher: Dispatcher,
}

impl<S: EventSource> DirectoryWatcher<S> {
    /// Create a watcher with nothing registered yet
    pub fn new(source: S, dispatcher: Dispatcher, recursive: bool) -> Self {
        Self {
            source,
            registry: WatchRegistry::new(),
            recursive,
            dispatcher,
        }
    }

    /// Create a watcher and register `root` (and its subtree if
    /// `recursive`).
    ///
    /// Fails if the tree cannot be walked or `root` itself cannot be
    /// watched. Subdirectories that refuse registration are skipped.
    pub fn start(source: S, dispatcher: Dispatcher, root: &Path, recursive: bool) -> Result<Self, WatchError> {
        let mut watcher = Self::new(source, dispatcher, recursive);
        if recursive {
            info!(root = %root.display(), "Scanning directory tree");
            let count = watcher.register_all(root)?;
            info!(directories = count, "Scan done");
            if !watcher.registry.contains(root) {
                return Err(WatchError::RootNotWatched {
                    root: root.to_path_buf(),
                });
            }
        } else {
            watcher.register(root)?;
        }
        Ok(watcher)
    }

    /// Register one directory. Registering a known directory is a no-op.
    pub fn register(&mut self, dir: &Path) -> Result<WatchHandle, WatchError> {
        if let Some(handle) = self.registry.handle_for(dir) {
            return Ok(handle);
        }
        self.source.watch(dir)?;
        let (handle, _) = self.registry.insert(dir);
        debug!(dir = %dir.display(), "register");
        Ok(handle)
    }

    /// Register `root` and every directory below it, returning how many
    /// were registered.
    ///
    /// A walk failure stops the walk. A directory that cannot be
    /// registered is logged and skipped; its subtree goes unmonitored.
    pub fn register_all(&mut self, root: &Path) -> Result<usize, WatchError> {
        let mut count = 0;
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|source| WatchError::Walk {
                root: root.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            match self.register(entry.path()) {
                Ok(_) => count += 1,
                Err(e) => error!("{}", e),
            }
        }
        Ok(count)
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Process events until the source closes or no directory is left
    pub fn run(&mut self) -> StopReason {
        info!(directories = self.registry.len(), "Watching for completed manifests");

        loop {
            let Some(batch) = self.source.next_batch() else {
                info!("Event source closed, watcher stopping");
                return StopReason::SourceClosed;
            };

            for event in batch {
                self.handle_event(event);
            }

            if self.registry.is_empty() {
                warn!("All watched directories are inaccessible, watcher stopping");
                return StopReason::NoDirectoriesLeft;
            }
        }
    }

    /// Apply one event
    pub fn handle_event(&mut self, event: FsEvent) {
        if event.kind == FsEventKind::Overflow {
            // Lost events are not recovered
            debug!("Event overflow ignored");
            return;
        }

        // A registered directory going away invalidates its handle
        if event.kind == FsEventKind::Delete && self.registry.contains(&event.path) {
            self.source.unwatch(&event.path);
            if let Some(handle) = self.registry.remove_dir(&event.path) {
                info!(dir = %event.path.display(), handle = ?handle, "Watched directory removed");
            }
            return;
        }

        let Some((_, dir)) = self.registry.owner_of(&event.path) else {
            debug!(path = %event.path.display(), kind = ?event.kind, "Event for unregistered directory");
            return;
        };
        debug!(dir = %dir.display(), path = %event.path.display(), kind = ?event.kind, "event");

        match event.kind {
            FsEventKind::Create => {
                info!(path = %event.path.display(), "Entry is being deposited");
                if self.recursive && is_real_dir(&event.path) {
                    match self.register_all(&event.path) {
                        Ok(count) => debug!(dir = %event.path.display(), directories = count, "New subtree registered"),
                        Err(e) => error!("{}", e),
                    }
                }
            }
            FsEventKind::Modify => {
                self.dispatcher.on_modify(&event.path);
            }
            FsEventKind::Delete | FsEventKind::Other | FsEventKind::Overflow => {}
        }
    }
}

impl<S: EventSource> std::fmt::Debug for DirectoryWatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("registry", &self.registry)
            .field("recursive", &self.recursive)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// Directory check that does not follow symlinks
fn is_real_dir(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_dir())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::CapturingSink;
    use crate::source::SourceStopper;
    use anyhow::Result;
    use dropzone_core::InFlightSet;
    use std::collections::{HashSet, VecDeque};
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Replays prepared batches, then reports closed
    #[derive(Default)]
    struct ScriptedSource {
        batches: VecDeque<Vec<FsEvent>>,
        watched: HashSet<PathBuf>,
        refuse: Option<PathBuf>,
    }

    impl ScriptedSource {
        fn with(batches: Vec<Vec<FsEvent>>) -> Self {
            Self {
                batches: batches.into(),
                ..Self::default()
            }
        }
    }

    impl EventSource for ScriptedSource {
        fn watch(&mut self, dir: &Path) -> Result<(), WatchError> {
            if self.refuse.as_deref() == Some(dir) {
                return Err(WatchError::Registration {
                    dir: dir.to_path_buf(),
                    source: notify::Error::generic("refused"),
                });
            }
            self.watched.insert(dir.to_path_buf());
            Ok(())
        }

        fn unwatch(&mut self, dir: &Path) {
            self.watched.remove(dir);
        }

        fn next_batch(&mut self) -> Option<Vec<FsEvent>> {
            self.batches.pop_front()
        }

        fn stopper(&self) -> SourceStopper {
            SourceStopper::channel().0
        }
    }

    fn modify(path: &Path) -> FsEvent {
        FsEvent::new(FsEventKind::Modify, path)
    }

    fn watcher_for(
        root: &Path,
        recursive: bool,
        batches: Vec<Vec<FsEvent>>,
    ) -> Result<(DirectoryWatcher<ScriptedSource>, Arc<CapturingSink>)> {
        let sink = Arc::new(CapturingSink::default());
        let dispatcher = Dispatcher::new("done", InFlightSet::new(), sink.clone());
        let watcher = DirectoryWatcher::start(ScriptedSource::with(batches), dispatcher, root, recursive)?;
        Ok((watcher, sink))
    }

    #[test]
    fn test_start_registers_whole_tree_when_recursive() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("a/b"))?;
        std::fs::create_dir_all(root.join("c"))?;
        std::fs::write(root.join("a/file.bin"), b"x")?;

        let (watcher, _) = watcher_for(root, true, vec![])?;

        let mut dirs: Vec<_> = watcher.registry().dirs().map(Path::to_path_buf).collect();
        dirs.sort();
        assert_eq!(
            dirs,
            vec![root.to_path_buf(), root.join("a"), root.join("a/b"), root.join("c")]
        );
        assert_eq!(watcher.source.watched.len(), 4);
        Ok(())
    }

    #[test]
    fn test_start_registers_only_root_when_flat() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        std::fs::create_dir_all(temp_dir.path().join("a"))?;

        let (watcher, _) = watcher_for(temp_dir.path(), false, vec![])?;
        assert_eq!(watcher.registry().len(), 1);
        assert!(watcher.registry().contains(temp_dir.path()));
        Ok(())
    }

    #[test]
    fn test_walk_failure_is_fatal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing = temp_dir.path().join("missing");

        let sink = Arc::new(CapturingSink::default());
        let dispatcher = Dispatcher::new("done", InFlightSet::new(), sink);
        let err = DirectoryWatcher::start(ScriptedSource::default(), dispatcher, &missing, true).unwrap_err();
        assert!(matches!(err, WatchError::Walk { .. }));
    }

    #[test]
    fn test_refused_subdirectory_skipped_at_startup() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("locked/inner"))?;
        std::fs::create_dir_all(root.join("open"))?;

        let sink = Arc::new(CapturingSink::default());
        let dispatcher = Dispatcher::new("done", InFlightSet::new(), sink);
        let source = ScriptedSource {
            refuse: Some(root.join("locked")),
            ..ScriptedSource::default()
        };
        let watcher = DirectoryWatcher::start(source, dispatcher, root, true)?;

        assert!(watcher.registry().contains(root));
        assert!(watcher.registry().contains(&root.join("open")));
        assert!(!watcher.registry().contains(&root.join("locked")));
        Ok(())
    }

    #[test]
    fn test_refused_root_is_fatal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();

        for recursive in [false, true] {
            let sink = Arc::new(CapturingSink::default());
            let dispatcher = Dispatcher::new("done", InFlightSet::new(), sink);
            let source = ScriptedSource {
                refuse: Some(root.to_path_buf()),
                ..ScriptedSource::default()
            };
            assert!(DirectoryWatcher::start(source, dispatcher, root, recursive).is_err());
        }
    }

    #[test]
    fn test_register_is_idempotent() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let (mut watcher, _) = watcher_for(temp_dir.path(), false, vec![])?;

        let first = watcher.register(temp_dir.path())?;
        let second = watcher.register(temp_dir.path())?;
        assert_eq!(first, second);
        assert_eq!(watcher.registry().len(), 1);
        Ok(())
    }

    #[test]
    fn test_modify_of_complete_manifest_dispatches() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let manifest = temp_dir.path().join("batch.done");
        std::fs::write(&manifest, "AAA,a.bin,p/\nFIN,FIN,FIN\n")?;

        let (mut watcher, sink) = watcher_for(
            temp_dir.path(),
            false,
            vec![vec![modify(&manifest), modify(&manifest)], vec![modify(&manifest)]],
        )?;

        assert_eq!(watcher.run(), StopReason::SourceClosed);
        // Repeats while the first job is outstanding are absorbed
        assert_eq!(sink.jobs.lock().len(), 1);
        Ok(())
    }

    #[test]
    fn test_create_and_delete_do_not_dispatch() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let manifest = temp_dir.path().join("batch.done");
        std::fs::write(&manifest, "FIN,FIN,FIN\n")?;

        let (mut watcher, sink) = watcher_for(
            temp_dir.path(),
            false,
            vec![vec![
                FsEvent::new(FsEventKind::Create, &manifest),
                FsEvent::new(FsEventKind::Delete, &manifest),
                FsEvent::new(FsEventKind::Other, &manifest),
                FsEvent::overflow(),
            ]],
        )?;

        watcher.run();
        assert!(sink.jobs.lock().is_empty());
        Ok(())
    }

    #[test]
    fn test_event_outside_registered_dirs_ignored() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let watched = temp_dir.path().join("watched");
        let elsewhere = temp_dir.path().join("elsewhere");
        std::fs::create_dir_all(&watched)?;
        std::fs::create_dir_all(&elsewhere)?;
        let stray = elsewhere.join("batch.done");
        std::fs::write(&stray, "FIN,FIN,FIN\n")?;

        let (mut watcher, sink) = watcher_for(&watched, false, vec![vec![modify(&stray)]])?;
        watcher.run();
        assert!(sink.jobs.lock().is_empty());
        Ok(())
    }

    #[test]
    fn test_created_subdirectory_registered_when_recursive() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        let (mut watcher, sink) = watcher_for(root, true, vec![])?;

        let sub = root.join("incoming");
        std::fs::create_dir_all(sub.join("nested"))?;
        watcher.handle_event(FsEvent::new(FsEventKind::Create, &sub));

        assert!(watcher.registry().contains(&sub));
        assert!(watcher.registry().contains(&sub.join("nested")));

        // Manifests in the new subtree are now picked up
        let manifest = sub.join("nested/batch.done");
        std::fs::write(&manifest, "FIN,FIN,FIN\n")?;
        watcher.handle_event(modify(&manifest));
        assert_eq!(sink.jobs.lock().len(), 1);
        Ok(())
    }

    #[test]
    fn test_created_subdirectory_ignored_when_flat() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let (mut watcher, _) = watcher_for(temp_dir.path(), false, vec![])?;

        let sub = temp_dir.path().join("incoming");
        std::fs::create_dir_all(&sub)?;
        watcher.handle_event(FsEvent::new(FsEventKind::Create, &sub));

        assert!(!watcher.registry().contains(&sub));
        Ok(())
    }

    #[test]
    fn test_failed_subdirectory_registration_is_not_fatal() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path();
        let (mut watcher, _) = watcher_for(root, true, vec![])?;

        let sub = root.join("locked");
        std::fs::create_dir_all(&sub)?;
        watcher.source.refuse = Some(sub.clone());
        watcher.handle_event(FsEvent::new(FsEventKind::Create, &sub));

        assert!(!watcher.registry().contains(&sub));
        assert!(watcher.registry().contains(root));
        Ok(())
    }

    #[test]
    fn test_loop_ends_when_last_directory_removed() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path().join("drop");
        std::fs::create_dir_all(root.join("sub"))?;

        let (mut watcher, _) = watcher_for(
            &root,
            true,
            vec![
                vec![FsEvent::new(FsEventKind::Delete, root.join("sub"))],
                vec![FsEvent::new(FsEventKind::Delete, &root)],
                vec![modify(&root.join("never.done"))],
            ],
        )?;

        assert_eq!(watcher.run(), StopReason::NoDirectoriesLeft);
        assert!(watcher.registry().is_empty());
        assert!(watcher.source.watched.is_empty());
        // The third batch was never consumed
        assert_eq!(watcher.source.batches.len(), 1);
        Ok(())
    }
}
