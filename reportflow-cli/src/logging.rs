//! Subscriber setup: console output plus a per-process log file.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use reportflow::utils::log_file_name;

/// Console format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleFormat {
    Plain,
    Json,
}

fn filter(verbose: bool) -> EnvFilter {
    let fallback = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Installs the global subscriber.
///
/// With `log_dir` set, a plain-text copy of every event goes to a file named
/// after the process start time. Returns the log file path.
pub fn init(verbose: bool, format: ConsoleFormat, log_dir: Option<&Path>) -> Result<Option<PathBuf>> {
    let console = match format {
        ConsoleFormat::Plain => fmt::layer().with_target(false).boxed(),
        ConsoleFormat::Json => fmt::layer().json().boxed(),
    };

    let (file_layer, path) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let path = dir.join(log_file_name(&Local::now()));
            let file = File::create(&path)
                .with_context(|| format!("cannot create log file {}", path.display()))?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .boxed();
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter(verbose))
        .with(console)
        .with(file_layer)
        .try_init()
        .context("logging already initialised")?;
    Ok(path)
}
