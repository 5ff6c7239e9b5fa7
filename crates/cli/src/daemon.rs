//! Daemon lifecycle: wire the pipeline, watch until stopped, shut down

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use dropzone_core::InFlightSet;
use dropzone_upload::{
    BatchUploader, DirectoryStore, JsonLinesSink, LogSink, MetricsReporter, MetricsSink, ShutdownMode,
    WorkerPool,
};
use dropzone_watcher::{AnySource, DirectoryWatcher, Dispatcher, EventSource, StopReason};
use tracing::{error, info};

use crate::config::{DropzoneConfig, SinkSetting};

/// Run the daemon in the foreground until a signal arrives or the
/// watched tree disappears
pub async fn run(config: DropzoneConfig, dir: &Path, recursive: bool) -> Result<()> {
    let metrics = metrics_sink(&config)?;
    let uploader = Arc::new(BatchUploader::new(
        Arc::new(DirectoryStore::new(&config.store.root)),
        config.store.bucket.clone(),
        MetricsReporter::new(metrics),
    ));
    let pool = Arc::new(
        WorkerPool::new(config.daemon.worker_threads, config.daemon.queue_capacity, uploader)
            .context("Failed to start worker pool")?,
    );

    let dispatcher = Dispatcher::new(&config.daemon.completion_suffix, InFlightSet::new(), pool.clone());
    let source = AnySource::new(config.watcher.backend()).context("Failed to start file watcher")?;
    let stopper = source.stopper();
    let mut watcher = DirectoryWatcher::start(source, dispatcher, dir, recursive)
        .with_context(|| format!("Failed to watch {}", dir.display()))?;

    let mut signals = signals::ShutdownSignals::install()?;

    info!(
        dir = %dir.display(),
        recursive,
        bucket = %config.store.bucket,
        suffix = %config.daemon.completion_suffix,
        "Dropzone daemon started"
    );

    let mut event_loop = tokio::task::spawn_blocking(move || watcher.run());

    let reason = tokio::select! {
        joined = &mut event_loop => joined.context("Event loop panicked")?,
        signal = signals.recv() => {
            info!(signal, "Shutdown requested, stopping watcher");
            stopper.stop();
            event_loop.await.context("Event loop panicked")?
        }
    };
    match reason {
        StopReason::SourceClosed => info!("Watcher stopped"),
        StopReason::NoDirectoriesLeft => error!("Watched directory is gone, nothing left to monitor"),
    }

    let mode = ShutdownMode::from(config.daemon.shutdown);
    tokio::task::spawn_blocking(move || pool.shutdown(mode))
        .await
        .context("Worker pool shutdown panicked")?;

    info!("Dropzone daemon stopped");
    Ok(())
}

fn metrics_sink(config: &DropzoneConfig) -> Result<Arc<dyn MetricsSink>> {
    Ok(match (config.metrics.sink, &config.metrics.path) {
        (SinkSetting::Jsonl, Some(path)) => Arc::new(
            JsonLinesSink::open(path)
                .with_context(|| format!("Failed to open metrics file: {}", path.display()))?,
        ),
        (SinkSetting::Jsonl, None) => anyhow::bail!("metrics.path is required for the jsonl sink"),
        (SinkSetting::Log, _) => Arc::new(LogSink),
    })
}

#[cfg(unix)]
mod signals {
    use anyhow::{Context, Result};
    use tokio::signal::unix::{signal, Signal, SignalKind};

    /// SIGINT and SIGTERM listeners, installed before the loop starts
    pub struct ShutdownSignals {
        interrupt: Signal,
        terminate: Signal,
    }

    impl ShutdownSignals {
        pub fn install() -> Result<Self> {
            Ok(Self {
                interrupt: signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?,
                terminate: signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?,
            })
        }

        /// Wait for the first shutdown signal and return its name
        pub async fn recv(&mut self) -> &'static str {
            tokio::select! {
                _ = self.interrupt.recv() => "SIGINT",
                _ = self.terminate.recv() => "SIGTERM",
            }
        }
    }
}

#[cfg(not(unix))]
mod signals {
    use anyhow::Result;
    use tracing::warn;

    pub struct ShutdownSignals;

    impl ShutdownSignals {
        pub fn install() -> Result<Self> {
            Ok(Self)
        }

        pub async fn recv(&mut self) -> &'static str {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            "Ctrl-C"
        }
    }
}
