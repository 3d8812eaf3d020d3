//! Subscriber setup for the `conductor` binary.
//!
//! Two layers: human-readable (or JSON) output on stderr, and a daily
//! rolling file under `.conductor/logs/`. The filter comes from `RUST_LOG`
//! when set, otherwise from `[logging] level`.

use crate::conductor_config::LoggingSection;
use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

pub const LOG_FILE_PREFIX: &str = "conductor.log";

/// Filter directive used when `RUST_LOG` is unset.
pub fn default_directive(config: &LoggingSection, verbose: bool) -> String {
    if verbose {
        "debug".to_string()
    } else {
        config.level.clone()
    }
}

fn build_filter(config: &LoggingSection, verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(default_directive(config, verbose))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Install the global subscriber. Keep the returned guard alive until the
/// process exits or buffered file output is lost.
///
/// Without a log directory (e.g. before `init`) only stderr is used.
pub fn init(config: &LoggingSection, verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let stderr = if config.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(build_filter(config, verbose))
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(build_filter(config, verbose))
            .boxed()
    };

    let (file, guard) = match log_dir {
        Some(dir) if dir.exists() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(build_filter(config, verbose))
                .boxed();
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr)
        .with(file)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(guard)
}
