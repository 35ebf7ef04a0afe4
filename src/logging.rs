//! Tracing subscriber setup.

use crate::config::{LoggingConfig, APP_DIR};
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<Option<PathBuf>> = OnceLock::new();

/// `<local data dir>/deskwarden/deskwarden.log`
pub fn log_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join(APP_DIR).join("deskwarden.log"))
}

fn open_log_file() -> Option<(File, PathBuf)> {
    let path = log_path()?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).ok()?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path).ok()?;
    Some((file, path))
}

fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Later calls are no-ops. Returns the log
/// file path when logging to a file.
pub fn init(config: &LoggingConfig) -> Option<PathBuf> {
    TRACING_INIT
        .get_or_init(|| {
            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter(config))
                .with_target(false);

            let file = config.to_file.then(open_log_file).flatten();
            match file {
                Some((file, path)) => {
                    let subscriber = builder.with_ansi(false).with_writer(Mutex::new(file)).finish();
                    tracing::subscriber::set_global_default(subscriber).ok()?;
                    Some(path)
                }
                None => {
                    let subscriber = builder.with_writer(std::io::stderr).finish();
                    let _ = tracing::subscriber::set_global_default(subscriber);
                    None
                }
            }
        })
        .clone()
}
