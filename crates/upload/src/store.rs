//! Object store capability
//!
//! The pipeline only needs `put(bucket, key, local_path)`. The client is
//! built once by the surrounding process and shared by every worker, so
//! implementations must be thread-safe.

use std::fs::File;
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

/// Upload failures surfaced by an [`ObjectStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid object key {key:?}")]
    InvalidKey { key: String },

    #[error("failed to store {bucket}/{key}: {source}")]
    Io {
        bucket: String,
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Destination for verified assets
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `local_path` under `key` in `bucket`.
    ///
    /// Returning `Ok(())` is taken as proof of upload; callers delete
    /// the local copy afterwards.
    fn put(&self, bucket: &str, key: &str, local_path: &Path) -> Result<(), StoreError>;
}

/// Object store rooted in a local directory: `<root>/<bucket>/<key>`
///
/// Objects are written to a temporary file next to their destination and
/// renamed into place, so a reader never sees a partial object.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `key` in `bucket` lives on disk, or `None` if the key would
    /// escape the bucket directory.
    pub fn object_path(&self, bucket: &str, key: &str) -> Option<PathBuf> {
        let relative = Path::new(key);
        let is_plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || key.ends_with('/') || !is_plain {
            return None;
        }
        Some(self.root.join(bucket).join(relative))
    }
}

impl ObjectStore for DirectoryStore {
    fn put(&self, bucket: &str, key: &str, local_path: &Path) -> Result<(), StoreError> {
        let dest = self
            .object_path(bucket, key)
            .ok_or_else(|| StoreError::InvalidKey {
                key: key.to_string(),
            })?;

        let io_err = |source| StoreError::Io {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source,
        };

        // object_path always yields at least <root>/<bucket>/<name>
        let parent = dest.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(parent).map_err(io_err)?;

        let mut source = File::open(local_path).map_err(io_err)?;
        let mut staged = NamedTempFile::new_in(parent).map_err(io_err)?;
        std::io::copy(&mut source, staged.as_file_mut()).map_err(io_err)?;
        staged.as_file().sync_all().map_err(io_err)?;
        staged.persist(&dest).map_err(|e| io_err(e.error))?;

        tracing::debug!(bucket, key, dest = %dest.display(), "object stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_put_copies_under_bucket_and_key() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let asset = temp_dir.path().join("file1.bin");
        std::fs::write(&asset, b"payload")?;

        let store = DirectoryStore::new(temp_dir.path().join("objects"));
        store.put("media", "prefix/nested/file1.bin", &asset)?;

        let stored = temp_dir.path().join("objects/media/prefix/nested/file1.bin");
        assert_eq!(std::fs::read(stored)?, b"payload");
        // Source is left alone; deleting it is the caller's job
        assert!(asset.exists());
        Ok(())
    }

    #[test]
    fn test_put_overwrites_existing_object() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let asset = temp_dir.path().join("a.bin");
        let store = DirectoryStore::new(temp_dir.path().join("objects"));

        std::fs::write(&asset, b"v1")?;
        store.put("b", "a.bin", &asset)?;
        std::fs::write(&asset, b"v2")?;
        store.put("b", "a.bin", &asset)?;

        assert_eq!(std::fs::read(temp_dir.path().join("objects/b/a.bin"))?, b"v2");
        Ok(())
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let store = DirectoryStore::new("/srv/objects");
        assert!(store.object_path("b", "../etc/passwd").is_none());
        assert!(store.object_path("b", "/abs/path").is_none());
        assert!(store.object_path("b", "").is_none());
        assert!(store.object_path("b", "prefix/").is_none());
        assert_eq!(
            store.object_path("b", "p/q.bin"),
            Some(PathBuf::from("/srv/objects/b/p/q.bin"))
        );
    }

    #[test]
    fn test_missing_source_is_io_error() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let store = DirectoryStore::new(temp_dir.path());

        let err = store
            .put("b", "k.bin", &temp_dir.path().join("missing.bin"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        Ok(())
    }
}
