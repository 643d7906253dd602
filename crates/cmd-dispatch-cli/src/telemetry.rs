//! ログ出力の初期化（stderr、compact / JSON）

use std::io::{self, IsTerminal};

use clap::ValueEnum;
use once_cell::sync::OnceCell;
use tracing::Subscriber;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

static INSTALLED: OnceCell<()> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("bad --log-filter: {0}")]
    Filter(String),

    #[error("another global subscriber is already set: {0}")]
    AlreadySet(#[from] SetGlobalDefaultError),
}

/// Install the process-wide subscriber. Only the first call has any effect.
pub fn init(filter: &str, format: LogFormat) -> Result<(), TelemetryError> {
    INSTALLED
        .get_or_try_init(|| {
            let subscriber = build_subscriber(filter, format)?;
            tracing::subscriber::set_global_default(subscriber)?;
            Ok::<(), TelemetryError>(())
        })
        .copied()
}

fn build_subscriber(
    filter: &str,
    format: LogFormat,
) -> Result<Box<dyn Subscriber + Send + Sync>, TelemetryError> {
    let filter =
        EnvFilter::try_new(filter).map_err(|err| TelemetryError::Filter(err.to_string()))?;

    // The dispatcher loop logs from its own named thread, so keep thread names.
    let base = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal());

    Ok(match format {
        LogFormat::Json => Box::new(base.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(base.compact().finish()),
    })
}
