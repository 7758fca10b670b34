use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::Subscriber;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

/// Installs a stderr layer at `level` and a debug-level plain-text layer
/// appending to `log_path`. A log file that cannot be opened only drops the
/// file layer; the failure is reported through the stderr layer.
pub fn init(level: LevelFilter, log_path: &Path) -> Result<()> {
    let (subscriber, file_error) = build_subscriber(level, log_path);
    subscriber
        .try_init()
        .context("failed to install log subscriber")?;

    if let Some(err) = file_error {
        tracing::warn!("file logging disabled: {err:#}");
    }
    Ok(())
}

pub(crate) fn build_subscriber(
    level: LevelFilter,
    log_path: &Path,
) -> (impl Subscriber + Send + Sync + 'static, Option<anyhow::Error>) {
    let (log_file, file_error) = match open_log_file(log_path) {
        Ok(file) => (Some(file), None),
        Err(err) => (None, Some(err)),
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(level);
    let file_layer = log_file.map(|file| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_thread_names(true)
            .with_filter(LevelFilter::DEBUG)
    });

    let subscriber = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer);
    (subscriber, file_error)
}

fn open_log_file(log_path: &Path) -> Result<File> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log dir: {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("failed to open log file: {}", log_path.display()))
}
