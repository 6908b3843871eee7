//! Tracing setup: human-readable stderr output plus `run.log` in the run directory

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::fmt;

/// Install the global subscriber
///
/// With a run directory, everything at DEBUG and above is also written to
/// `<run_dir>/run.log`; keep the returned guard alive until the run ends so
/// the file is flushed.
pub fn init(verbose: bool, run_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let stderr = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(level);

    match run_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "run.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(LevelFilter::DEBUG);
            tracing_subscriber::registry()
                .with(stderr)
                .with(file)
                .try_init()
                .context("Failed to install logger")?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(stderr)
                .try_init()
                .context("Failed to install logger")?;
            Ok(None)
        }
    }
}
