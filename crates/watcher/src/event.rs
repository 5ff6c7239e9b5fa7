//! Backend-neutral file system events

use std::path::PathBuf;

use notify::event::{ModifyKind, RenameMode};
use notify::EventKind;

/// File system event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    /// Path that changed (empty for overflow)
    pub path: PathBuf,
    /// Type of change
    pub kind: FsEventKind,
}

impl FsEvent {
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Event queue saturation; some events were lost
    pub fn overflow() -> Self {
        Self::new(FsEventKind::Overflow, PathBuf::new())
    }
}

/// Type of file system event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    /// Events were dropped by the backend
    Overflow,
    /// Entry created (or moved in)
    Create,
    /// Entry contents or attributes modified
    Modify,
    /// Entry deleted (or moved out)
    Delete,
    /// Anything else
    Other,
}

impl FsEventKind {
    /// Map a `notify` event kind
    pub fn from_notify(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => FsEventKind::Create,
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FsEventKind::Create,
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FsEventKind::Delete,
            EventKind::Modify(ModifyKind::Name(_)) => FsEventKind::Other,
            EventKind::Modify(_) => FsEventKind::Modify,
            EventKind::Remove(_) => FsEventKind::Delete,
            _ => FsEventKind::Other,
        }
    }
}

/// Split a `notify` event into one [`FsEvent`] per path
pub fn from_notify(event: notify::Event) -> Vec<FsEvent> {
    if event.need_rescan() {
        return vec![FsEvent::overflow()];
    }
    let kind = FsEventKind::from_notify(&event.kind);
    event
        .paths
        .into_iter()
        .map(|path| FsEvent::new(kind, path))
        .collect()
}
