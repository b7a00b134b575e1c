//! Tracing setup.
//!
//! The TUI owns the terminal, so interactive runs log to a file; scripted runs log to stderr.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub(crate) enum LogSink {
    File(PathBuf),
    Stderr,
}

/// `<cache dir>/radio-stream-panel/panel.log`, if the platform has a cache dir.
pub(crate) fn default_log_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("radio-stream-panel").join("panel.log"))
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))
}

pub(crate) fn init(level: &str, sink: LogSink) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(build_filter(level));
    match sink {
        LogSink::File(path) => {
            let file = open_log_file(&path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        LogSink::Stderr => builder.with_writer(std::io::stderr).try_init(),
    }
    .map_err(|e| anyhow::anyhow!("install tracing subscriber: {e}"))
}
