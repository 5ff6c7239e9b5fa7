//! Dropzone CLI - dropzone command

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;

mod config;
mod daemon;
mod logging;

use config::DropzoneConfig;

/// Dropzone - watch a directory and upload completed asset batches
#[derive(Parser, Debug)]
#[command(name = "dropzone")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Also watch every subdirectory, including ones created later
    #[arg(short, long)]
    recursive: bool,

    /// Configuration file (default: $DROPZONE_CONFIG, then
    /// <config dir>/dropzone/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory to watch
    dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = config::config_file_path(cli.config.as_deref())?;
    let config = DropzoneConfig::load(&config_path)?;

    let dir = std::fs::canonicalize(&cli.dir)
        .with_context(|| format!("Cannot access watch directory: {}", cli.dir.display()))?;
    if !dir.is_dir() {
        bail!("Not a directory: {}", cli.dir.display());
    }

    // Keep the guard alive until exit so file logs are flushed
    let _log_guard = logging::init(&config.logging)?;
    tracing::debug!(config = %config_path.display(), "Loaded configuration");

    daemon::run(config, &dir, cli.recursive).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_flags_and_directory() {
        let cli = Cli::try_parse_from(["dropzone", "-r", "--config", "/etc/dz.toml", "/srv/drop"]).unwrap();
        assert!(cli.recursive);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/dz.toml")));
        assert_eq!(cli.dir, PathBuf::from("/srv/drop"));
    }

    #[test]
    fn test_directory_is_required() {
        assert!(Cli::try_parse_from(["dropzone"]).is_err());
        assert!(Cli::try_parse_from(["dropzone", "-r"]).is_err());
    }

    #[test]
    fn test_single_directory_only() {
        assert!(Cli::try_parse_from(["dropzone", "/a", "/b"]).is_err());
    }

    #[test]
    fn test_long_recursive_flag() {
        let cli = Cli::try_parse_from(["dropzone", "--recursive", "/srv/drop"]).unwrap();
        assert!(cli.recursive);
        assert!(cli.config.is_none());
    }
}
