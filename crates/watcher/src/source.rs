//! Event sources: the blocking "next events" capability
//!
//! The directory watcher only sees [`EventSource`]. Two implementations
//! are provided on top of `notify`: the platform's native backend
//! (inotify, FSEvents, ReadDirectoryChangesW, ...) and a polling backend
//! for file systems where native notifications are unreliable, such as
//! network mounts.
//!
//! Directories are registered one at a time and non-recursively so that
//! the watcher keeps its own directory registrations.

use std::path::Path;
use std::time::Duration;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use notify::{PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::error::WatchError;
use crate::event::{self, FsEvent};

/// Blocking source of file system events
pub trait EventSource {
    /// Start delivering events for entries directly inside `dir`
    fn watch(&mut self, dir: &Path) -> Result<(), WatchError>;

    /// Stop delivering events for `dir`. Unknown directories are ignored.
    fn unwatch(&mut self, dir: &Path);

    /// Block until events are available.
    ///
    /// Returns `None` once the source has been stopped or its backend
    /// has gone away.
    fn next_batch(&mut self) -> Option<Vec<FsEvent>>;

    /// Handle that can stop this source from another thread
    fn stopper(&self) -> SourceStopper;
}

/// Stops an [`EventSource`], waking a blocked `next_batch`
#[derive(Debug, Clone)]
pub struct SourceStopper {
    tx: Sender<()>,
}

impl SourceStopper {
    /// Create a stopper and the receiver a source should select on
    pub fn channel() -> (Self, Receiver<()>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    pub fn stop(&self) {
        // Source already gone: nothing to wake
        let _ = self.tx.send(());
    }
}

/// Which `notify` backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Native,
    Poll { interval: Duration },
}

/// [`EventSource`] backed by a `notify` watcher
pub struct NotifySource<W: Watcher> {
    watcher: W,
    events: Receiver<notify::Result<notify::Event>>,
    stop_tx: SourceStopper,
    stop_rx: Receiver<()>,
}

impl NotifySource<RecommendedWatcher> {
    /// Native backend for the current platform
    pub fn native() -> Result<Self, WatchError> {
        let (tx, events) = unbounded();
        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(|source| WatchError::Backend {
            backend: "native",
            source,
        })?;
        Ok(Self::from_parts(watcher, events))
    }
}

impl NotifySource<PollWatcher> {
    /// Polling backend, rescanning watched directories every `interval`
    pub fn polling(interval: Duration) -> Result<Self, WatchError> {
        let (tx, events) = unbounded();
        let watcher = PollWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default().with_poll_interval(interval),
        )
        .map_err(|source| WatchError::Backend {
            backend: "poll",
            source,
        })?;
        Ok(Self::from_parts(watcher, events))
    }
}

impl<W: Watcher> NotifySource<W> {
    fn from_parts(watcher: W, events: Receiver<notify::Result<notify::Event>>) -> Self {
        let (stop_tx, stop_rx) = SourceStopper::channel();
        Self {
            watcher,
            events,
            stop_tx,
            stop_rx,
        }
    }

    fn convert(res: notify::Result<notify::Event>) -> Vec<FsEvent> {
        match res {
            Ok(ev) => event::from_notify(ev),
            Err(e) => {
                // Backend errors mean lost events, same as a queue overflow
                warn!("Watcher backend error: {}", e);
                vec![FsEvent::overflow()]
            }
        }
    }
}

impl<W: Watcher> EventSource for NotifySource<W> {
    fn watch(&mut self, dir: &Path) -> Result<(), WatchError> {
        self.watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Registration {
                dir: dir.to_path_buf(),
                source,
            })
    }

    fn unwatch(&mut self, dir: &Path) {
        // The backend usually drops watches on deleted directories itself
        if let Err(e) = self.watcher.unwatch(dir) {
            debug!(dir = %dir.display(), "unwatch: {}", e);
        }
    }

    fn next_batch(&mut self) -> Option<Vec<FsEvent>> {
        let first = select! {
            recv(self.stop_rx) -> _ => return None,
            recv(self.events) -> msg => msg.ok()?,
        };

        let mut batch = Self::convert(first);
        // Take whatever else is already queued
        while let Ok(res) = self.events.try_recv() {
            batch.extend(Self::convert(res));
        }
        Some(batch)
    }

    fn stopper(&self) -> SourceStopper {
        self.stop_tx.clone()
    }
}

/// Either backend behind one concrete type
pub enum AnySource {
    Native(NotifySource<RecommendedWatcher>),
    Poll(NotifySource<PollWatcher>),
}

impl AnySource {
    pub fn new(backend: Backend) -> Result<Self, WatchError> {
        Ok(match backend {
            Backend::Native => AnySource::Native(NotifySource::native()?),
            Backend::Poll { interval } => AnySource::Poll(NotifySource::polling(interval)?),
        })
    }
}

impl EventSource for AnySource {
    fn watch(&mut self, dir: &Path) -> Result<(), WatchError> {
        match self {
            AnySource::Native(s) => s.watch(dir),
            AnySource::Poll(s) => s.watch(dir),
        }
    }

    fn unwatch(&mut self, dir: &Path) {
        match self {
            AnySource::Native(s) => s.unwatch(dir),
            AnySource::Poll(s) => s.unwatch(dir),
        }
    }

    fn next_batch(&mut self) -> Option<Vec<FsEvent>> {
        match self {
            AnySource::Native(s) => s.next_batch(),
            AnySource::Poll(s) => s.next_batch(),
        }
    }

    fn stopper(&self) -> SourceStopper {
        match self {
            AnySource::Native(s) => s.stopper(),
            AnySource::Poll(s) => s.stopper(),
        }
    }
}
