//! Per-batch counters and the sinks they are submitted to
//!
//! Every finished batch produces exactly one submission carrying two
//! counters, `UPLOADED` and `FAILED`, under a fixed namespace and a fixed
//! grouping dimension.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// Namespace all counters are submitted under
pub const NAMESPACE: &str = "EDGE/NODE";
/// Name of the grouping dimension attached to each counter
pub const DIMENSION_NAME: &str = "FILE METRICS";
/// Value of the grouping dimension attached to each counter
pub const DIMENSION_VALUE: &str = "FILES";
/// Counter for entries verified, uploaded and deleted
pub const UPLOADED: &str = "UPLOADED";
/// Counter for entries that failed at any stage
pub const FAILED: &str = "FAILED";

/// Outcome counts for one batch. Never accumulated across batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchTally {
    pub valid: u64,
    pub failed: u64,
}

impl BatchTally {
    /// Total entries accounted for
    pub fn total(&self) -> u64 {
        self.valid + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Unit {
    None,
    Count,
}

/// A single named measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDatum {
    pub name: String,
    pub value: f64,
    pub unit: Unit,
    pub dimensions: Vec<Dimension>,
}

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to write metrics to {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode metrics: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for metric submissions
pub trait MetricsSink: Send + Sync {
    /// Submit all `data` as one combined request
    fn submit(&self, namespace: &str, data: &[MetricDatum]) -> Result<(), MetricsError>;
}

/// Sink that emits each datum as a structured log record
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn submit(&self, namespace: &str, data: &[MetricDatum]) -> Result<(), MetricsError> {
        for datum in data {
            info!(
                namespace,
                metric = %datum.name,
                value = datum.value,
                unit = ?datum.unit,
                "metric"
            );
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct Submission<'a> {
    namespace: &'a str,
    timestamp_ms: u64,
    metrics: &'a [MetricDatum],
}

/// Sink appending one JSON object per submission to a file
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    /// Open (or create) `path` for appending
    pub fn open(path: &Path) -> Result<Self, MetricsError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| MetricsError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }
}

impl MetricsSink for JsonLinesSink {
    fn submit(&self, namespace: &str, data: &[MetricDatum]) -> Result<(), MetricsError> {
        let submission = Submission {
            namespace,
            timestamp_ms: current_timestamp_ms(),
            metrics: data,
        };
        let mut line = serde_json::to_vec(&submission)?;
        line.push(b'\n');

        // One write per line keeps concurrent submissions from interleaving
        self.file
            .lock()
            .write_all(&line)
            .map_err(|source| MetricsError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

/// Turns batch tallies into metric submissions
#[derive(Clone)]
pub struct MetricsReporter {
    sink: Arc<dyn MetricsSink>,
}

impl MetricsReporter {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    /// The two counters submitted for `tally`
    pub fn data_for(tally: BatchTally) -> Vec<MetricDatum> {
        let dimension = Dimension {
            name: DIMENSION_NAME.to_string(),
            value: DIMENSION_VALUE.to_string(),
        };
        vec![
            MetricDatum {
                name: UPLOADED.to_string(),
                value: tally.valid as f64,
                unit: Unit::None,
                dimensions: vec![dimension.clone()],
            },
            MetricDatum {
                name: FAILED.to_string(),
                value: tally.failed as f64,
                unit: Unit::None,
                dimensions: vec![dimension],
            },
        ]
    }

    /// Submit the counters for one finished batch.
    ///
    /// Failures are logged and swallowed; a batch is complete whether or
    /// not its metrics arrive.
    pub fn report(&self, tally: BatchTally) -> bool {
        match self.sink.submit(NAMESPACE, &Self::data_for(tally)) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    uploaded = tally.valid,
                    failed = tally.failed,
                    "Failed to submit batch metrics: {}",
                    e
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for MetricsReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsReporter").finish_non_exhaustive()
    }
}

fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
