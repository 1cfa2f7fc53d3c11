//! Tracing/logging initialization.
//!
//! Filtering follows `RUST_LOG` (default `info`). The output format is chosen by
//! `STGCMT_LOG_FORMAT`: `json` (default) or `pretty`.

use core::str::FromStr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const LOG_FORMAT_VAR: &str = "STGCMT_LOG_FORMAT";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, for log shipping.
    #[default]
    Json,
    /// Multi-line human readable output.
    Pretty,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown log format '{0}' (expected 'json' or 'pretty')")]
pub struct UnknownLogFormat(pub String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(UnknownLogFormat(s.to_string())),
        }
    }
}

impl LogFormat {
    /// Format from a raw variable value; unset means the default.
    pub fn from_value(value: Option<&str>) -> Result<Self, UnknownLogFormat> {
        value.map_or(Ok(LogFormat::default()), str::parse)
    }
}

/// Initialize tracing/logging for the process from the environment.
///
/// Safe to call multiple times (subsequent calls are no-ops). An unrecognised
/// `STGCMT_LOG_FORMAT` falls back to JSON and is reported once the subscriber is up.
pub fn init() {
    let raw = std::env::var(LOG_FORMAT_VAR).ok();
    match LogFormat::from_value(raw.as_deref()) {
        Ok(format) => init_with(format),
        Err(err) => {
            init_with(LogFormat::Json);
            ::tracing::warn!(error = %err, "falling back to JSON logs");
        }
    }
}

/// Initialize with an explicit output format.
pub fn init_with(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let _ = match format {
        LogFormat::Json => builder.json().with_target(false).try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}
