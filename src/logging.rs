//! Tracing setup: stdout plus a timestamped log file per run.
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Error, Result};

/// Environment variable overriding the log filter, e.g. `LOG_LEVEL=debug`.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(format!(
        "log_ssvep_cca_{}.log",
        Local::now().format("%Y-%m-%d_%H-%M-%S")
    ))
}

/// Installs the global subscriber and returns the log file path.
pub fn init(log_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(log_dir)?;
    let path = log_file_path(log_dir);
    let file = File::create(&path)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_thread_names(true)
                .with_writer(Mutex::new(file)),
        )
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var(LOG_LEVEL_ENV)
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install logger: {e}")))?;

    Ok(path)
}
