//! Error types shared across the pipeline

use std::path::PathBuf;
use thiserror::Error;

/// A manifest could not be turned into a batch at detection time.
///
/// Any of these drops the triggering event; nothing is retried.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest {} is empty", path.display())]
    Empty { path: PathBuf },

    #[error("manifest {} is not terminated by the sentinel line", path.display())]
    MissingSentinel { path: PathBuf },

    #[error("manifest {} has no parent directory", path.display())]
    NoParent { path: PathBuf },
}

/// Hashing an asset failed before a digest could be produced
#[derive(Debug, Error)]
#[error("failed to hash {}: {source}", path.display())]
pub struct HashError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// A manifest entry names something other than a plain sibling file
#[derive(Debug, Error)]
#[error("asset name {name:?} is not a plain file name")]
pub struct AssetNameError {
    pub name: String,
}
