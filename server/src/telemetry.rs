use clap::ArgEnum;
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "info,tower_http=info";

#[derive(Copy, Clone, Debug, PartialEq, Eq, ArgEnum)]
pub enum LogFormat {
    /// human readable lines
    Pretty,
    /// one JSON object per event
    Json,
}

#[derive(Clone, Debug)]
pub struct LogSettings {
    pub format: LogFormat,
    pub file: Option<PathBuf>,
}

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("cannot open log file {path}: {source}")]
    LogFile { path: PathBuf, source: io::Error },
    #[error("logging already initialized: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global subscriber: stdout in the chosen format, plus an append-only copy in
/// `settings.file` when one is configured. `RUST_LOG` overrides the default filter.
pub fn init_logging(settings: &LogSettings) -> Result<(), TelemetryError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let stdout = match settings.format {
        LogFormat::Pretty => fmt::layer().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    let file = match &settings.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| TelemetryError::LogFile {
                    path: path.clone(),
                    source,
                })?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritable_log_file_is_reported() {
        let settings = LogSettings {
            format: LogFormat::Pretty,
            file: Some("/nonexistent-dir/gateway.log".into()),
        };
        assert!(matches!(
            init_logging(&settings),
            Err(TelemetryError::LogFile { .. })
        ));
    }
}
