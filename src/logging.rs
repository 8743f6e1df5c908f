//! Structured logging setup.
//!
//! The library itself only emits `tracing` events; binaries call [`init`]
//! once. `RUST_LOG` takes precedence over the configured level.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human readable, for development
    #[default]
    Pretty,
    /// One JSON object per event, for log aggregation
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directives, e.g. `info` or `resilient_http=debug,reqwest=warn`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Filter built from the configured directives only
    pub fn filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.level)
            .map_err(|e| Error::configuration("logging.level", e.to_string()))
    }
}

/// Install the global subscriber
///
/// Returns `Ok` without changes if a subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => config.filter()?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Global tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        let config = LoggingConfig {
            level: "resilient_http=debug,reqwest=warn".to_string(),
            ..Default::default()
        };
        assert!(config.filter().is_ok());

        let config = LoggingConfig {
            level: "resilient_http=[[".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.filter(), Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        assert!(init(&config).is_ok());
        assert!(init(&LoggingConfig {
            format: LogFormat::Json,
            ..config
        })
        .is_ok());
    }
}
