//! Watcher errors

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    /// The backend could not be created
    #[error("failed to start {backend} watcher: {source}")]
    Backend {
        backend: &'static str,
        #[source]
        source: notify::Error,
    },

    /// A directory could not be registered; its subtree goes unmonitored
    #[error("failed to watch {}: {source}", dir.display())]
    Registration {
        dir: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The watched root itself could not be registered
    #[error("nothing to watch: {} could not be registered", root.display())]
    RootNotWatched { root: PathBuf },

    /// Walking a directory tree for registration failed
    #[error("failed to walk {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}
