//! Directory watching for Dropzone
//!
//! This crate turns file system events into upload batches:
//! - Native or polling event sources on top of `notify`
//! - Optional recursive registration, including directories created later
//! - Completion detection by file suffix and manifest sentinel
//! - At most one job per manifest path at a time

pub mod directory;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod registry;
pub mod source;

pub use directory::{DirectoryWatcher, StopReason};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::WatchError;
pub use event::{FsEvent, FsEventKind};
pub use registry::{WatchHandle, WatchRegistry};
pub use source::{AnySource, Backend, EventSource, NotifySource, SourceStopper};
