//! Tracing subscriber setup

use crate::settings::{LogFormat, LogSettings};
use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "jobflow=info";
const LOG_FILE_PREFIX: &str = "jobflow.log";

/// Install the global subscriber
///
/// `RUST_LOG` overrides the default filter. When a log directory is configured, JSON lines are
/// also written to a daily-rotated file; keep the returned guard alive until exit or the tail
/// of the log is lost.
pub fn init(settings: &LogSettings) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("invalid log filter")?;

    let (file_layer, guard) = match &settings.directory {
        Some(directory) => {
            let directory = shellexpand::tilde(directory).into_owned();
            std::fs::create_dir_all(&directory)
                .with_context(|| format!("cannot create log directory {}", directory))?;
            let appender = tracing_appender::rolling::daily(&directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    match settings.format {
        // Production: one JSON object per line
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    }
    .context("failed to install tracing subscriber")?;

    Ok(guard)
}
