//! Core building blocks for Dropzone
//!
//! This crate provides:
//! - MD5 digests for asset verification
//! - Manifest (completion marker) parsing
//! - The in-flight guard preventing duplicate batch dispatch
//! - Error types shared by the pipeline crates

pub mod error;
pub mod hash;
pub mod inflight;
pub mod manifest;

// Re-exports
pub use error::{AssetNameError, HashError, ManifestError};
pub use hash::{hash_bytes, hash_file, Md5Digest};
pub use inflight::{InFlightGuard, InFlightSet};
pub use manifest::{Manifest, ManifestEntry, ManifestLine, SENTINEL};
