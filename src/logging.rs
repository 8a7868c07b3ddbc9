use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::Subscriber;
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;
use crate::errors::{LauncherError, Result};

const LOG_FILE_PREFIX: &str = "content-engine.log";
const FALLBACK_LEVEL: &str = "info";

static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Sets up engine logging from config and returns the directory logs go to.
pub fn init_from_config(config: &EngineConfig) -> Result<PathBuf> {
    let log_dir = config.log_directory();
    init(&log_dir, &config.log_level)?;
    Ok(log_dir)
}

/// Installs the global subscriber writing to a daily rolling file in `log_dir`.
/// Later calls are no-ops once a subscriber from here is installed.
pub fn init(log_dir: &Path, default_level: &str) -> Result<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }
    fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = Subscriber::builder()
        .with_env_filter(filter(default_level))
        .with_writer(non_blocking)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| LauncherError::Config(err.to_string()))?;
    let _ = LOG_GUARD.set(guard);

    tracing::info!("logging to {:?}", log_dir);
    Ok(())
}

/// `RUST_LOG` wins; an unparsable configured level falls back to `info`.
fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level.trim()))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_LEVEL))
}
