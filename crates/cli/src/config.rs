//! Daemon configuration
//!
//! Read once from a TOML file at startup, never reloaded:
//!
//! ```toml
//! [daemon]
//! worker_threads = 4
//! completion_suffix = "done"
//! shutdown = "drain"
//!
//! [watcher]
//! backend = "native"
//!
//! [store]
//! bucket = "edge-assets"
//! root = "/var/lib/dropzone/objects"
//!
//! [metrics]
//! sink = "log"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dropzone_upload::ShutdownMode;
use dropzone_watcher::Backend;
use serde::Deserialize;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "DROPZONE_CONFIG";

const MAX_WORKER_THREADS: usize = 256;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DropzoneConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Worker pool size
    pub worker_threads: usize,
    /// Bounded job queue size; unbounded when absent
    pub queue_capacity: Option<usize>,
    /// Completion-marker extension
    pub completion_suffix: String,
    pub shutdown: ShutdownSetting,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            queue_capacity: None,
            completion_suffix: "done".to_string(),
            shutdown: ShutdownSetting::Drain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownSetting {
    Drain,
    Abandon,
}

impl From<ShutdownSetting> for ShutdownMode {
    fn from(setting: ShutdownSetting) -> Self {
        match setting {
            ShutdownSetting::Drain => ShutdownMode::Drain,
            ShutdownSetting::Abandon => ShutdownMode::Abandon,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatcherConfig {
    pub backend: BackendSetting,
    /// Rescan interval for the `poll` backend
    pub poll_interval_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            backend: BackendSetting::Native,
            poll_interval_ms: 2000,
        }
    }
}

impl WatcherConfig {
    pub fn backend(&self) -> Backend {
        match self.backend {
            BackendSetting::Native => Backend::Native,
            BackendSetting::Poll => Backend::Poll {
                interval: Duration::from_millis(self.poll_interval_ms),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSetting {
    Native,
    Poll,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Destination bucket for every upload
    pub bucket: String,
    /// Directory objects are written under, as `<root>/<bucket>/<key>`
    pub root: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    pub sink: SinkSetting,
    /// Output file for the `jsonl` sink
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkSetting {
    #[default]
    Log,
    Jsonl,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files
    pub directory: Option<PathBuf>,
    /// Default filter directive when `RUST_LOG` is unset
    pub filter: Option<String>,
}

impl DropzoneConfig {
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate the file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("In config file: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        let daemon = &self.daemon;
        if !(1..=MAX_WORKER_THREADS).contains(&daemon.worker_threads) {
            bail!(
                "daemon.worker_threads must be between 1 and {} (got {})",
                MAX_WORKER_THREADS,
                daemon.worker_threads
            );
        }
        if daemon.queue_capacity == Some(0) {
            bail!("daemon.queue_capacity must be at least 1 (omit it for an unbounded queue)");
        }
        if daemon.completion_suffix.trim_start_matches('.').is_empty() {
            bail!("daemon.completion_suffix must not be empty");
        }

        if self.watcher.backend == BackendSetting::Poll && self.watcher.poll_interval_ms == 0 {
            bail!("watcher.poll_interval_ms must be greater than 0");
        }

        if self.store.bucket.trim().is_empty() {
            bail!("store.bucket must not be empty");
        }
        if self.store.root.as_os_str().is_empty() {
            bail!("store.root must not be empty");
        }

        if self.metrics.sink == SinkSetting::Jsonl && self.metrics.path.is_none() {
            bail!("metrics.path is required for the jsonl sink");
        }

        Ok(())
    }
}

/// Config file location: `explicit`, else `$DROPZONE_CONFIG`, else the
/// user config directory
pub fn config_file_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    let dir = dirs::config_dir().context("Could not determine config directory")?;
    Ok(dir.join("dropzone").join("config.toml"))
}
