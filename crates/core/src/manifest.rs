//! Completion-marker (manifest) parsing
//!
//! A manifest is a UTF-8 text file deposited next to a batch of assets.
//! Each line names one asset:
//!
//! ```text
//! CHECKSUM,FILENAME,KEY_PREFIX
//! ```
//!
//! and the file is considered fully written once its last line is the
//! sentinel `FIN,FIN,FIN`. Commas inside file names or prefixes are not
//! escapable; such lines split wherever the commas fall.

use std::path::{Component, Path, PathBuf};

use crate::error::{AssetNameError, ManifestError};

/// Literal terminator marking a manifest as complete
pub const SENTINEL: &str = "FIN,FIN,FIN";

/// One asset listed in a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Declared MD5 checksum, hex, any letter case
    pub checksum: String,
    /// Asset file name, relative to the manifest's directory
    pub file_name: String,
    /// Prefix prepended to the file name to form the object key
    pub key_prefix: String,
}

impl ManifestEntry {
    /// Object-store key for this asset: `key_prefix + file_name`
    pub fn object_key(&self) -> String {
        format!("{}{}", self.key_prefix, self.file_name)
    }

    /// Resolve the asset inside `parent_dir`.
    ///
    /// The file name must be exactly one normal path component: no
    /// separators, no `.`/`..`, no root or drive prefix.
    pub fn asset_path(&self, parent_dir: &Path) -> Result<PathBuf, AssetNameError> {
        let mut components = Path::new(&self.file_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) if name == self.file_name.as_str() => {
                Ok(parent_dir.join(name))
            }
            _ => Err(AssetNameError {
                name: self.file_name.clone(),
            }),
        }
    }
}

/// A parsed manifest line, sentinel excluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLine {
    /// A well-formed asset line
    Entry(ManifestEntry),
    /// A line with fewer than three comma-separated fields.
    ///
    /// Kept so the batch can count it as a failed entry instead of
    /// silently dropping it.
    Malformed {
        /// 1-based line number within the manifest
        line_number: usize,
        /// The raw line text
        raw: String,
    },
}

/// A complete manifest tied to its location on disk
#[derive(Debug, Clone)]
pub struct Manifest {
    path: PathBuf,
    parent_dir: PathBuf,
    lines: Vec<ManifestLine>,
}

impl Manifest {
    /// Read and parse the manifest at `path`.
    ///
    /// Fails if the file cannot be read as UTF-8, is empty, or its last
    /// line is not the sentinel.
    pub fn read(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    /// Parse manifest text that was read from `path`
    pub fn parse(path: &Path, text: &str) -> Result<Self, ManifestError> {
        if text.lines().next().is_none() {
            return Err(ManifestError::Empty {
                path: path.to_path_buf(),
            });
        }
        if !is_complete(text) {
            return Err(ManifestError::MissingSentinel {
                path: path.to_path_buf(),
            });
        }

        let parent_dir = path
            .parent()
            .ok_or_else(|| ManifestError::NoParent {
                path: path.to_path_buf(),
            })?
            .to_path_buf();

        Ok(Self {
            path: path.to_path_buf(),
            parent_dir,
            lines: parse_lines(text),
        })
    }

    /// Path of the manifest file itself
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the manifest and its assets
    pub fn parent_dir(&self) -> &Path {
        &self.parent_dir
    }

    /// All parsed lines in file order
    pub fn lines(&self) -> &[ManifestLine] {
        &self.lines
    }

    /// Well-formed entries in file order
    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.lines.iter().filter_map(|line| match line {
            ManifestLine::Entry(entry) => Some(entry),
            ManifestLine::Malformed { .. } => None,
        })
    }

    /// Resolve an entry's asset as a sibling of the manifest
    pub fn asset_path(&self, entry: &ManifestEntry) -> Result<PathBuf, AssetNameError> {
        entry.asset_path(&self.parent_dir)
    }

    /// Split into owned parts (path, parent directory, lines)
    pub fn into_parts(self) -> (PathBuf, PathBuf, Vec<ManifestLine>) {
        (self.path, self.parent_dir, self.lines)
    }
}

/// True if the text's final line is exactly the sentinel
pub fn is_complete(text: &str) -> bool {
    text.lines().last() == Some(SENTINEL)
}

/// Parse every non-sentinel line of a manifest.
///
/// Fields past the third are ignored and trailing empty fields do not
/// count, so `AAA,a.bin,` is malformed. Sentinel lines anywhere in the
/// text are skipped.
pub fn parse_lines(text: &str) -> Vec<ManifestLine> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| *line != SENTINEL)
        .map(|(idx, line)| parse_line(idx + 1, line))
        .collect()
}

fn parse_line(line_number: usize, line: &str) -> ManifestLine {
    let mut fields = line.trim_end_matches(',').split(',');
    match (fields.next(), fields.next(), fields.next()) {
        (Some(checksum), Some(file_name), Some(key_prefix)) => ManifestLine::Entry(ManifestEntry {
            checksum: checksum.to_string(),
            file_name: file_name.to_string(),
            key_prefix: key_prefix.to_string(),
        }),
        _ => ManifestLine::Malformed {
            line_number,
            raw: line.to_string(),
        },
    }
}
