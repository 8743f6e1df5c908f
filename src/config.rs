//! # Configuration
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `RESILIENT_HTTP__*` environment variables (`__` separates nested keys,
//! e.g. `RESILIENT_HTTP__DEFAULTS__MAX_RETRIES=5`).
//!
//! ```toml
//! [defaults]
//! failure_threshold = 3
//! reset_timeout_secs = 60
//! max_retries = 3
//!
//! [targets.payments-api]
//! failure_threshold = 5
//! failure_policy = "transport_and_server_errors"
//! backoff = { kind = "linear", step_ms = 250 }
//! ```

use crate::logging::LoggingConfig;
use crate::resilience::{
    BackoffConfig, BreakerConfig, FailurePolicy, ResilientCaller, ResilientCallerBuilder,
};
use crate::transport::HttpClientConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const ENV_PREFIX: &str = "RESILIENT_HTTP";

/// Resilience settings for one target label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    /// Total attempts per call
    pub max_retries: u32,
    pub attempt_timeout_secs: Option<u64>,
    pub failure_policy: FailurePolicy,
    pub backoff: BackoffConfig,
}

impl Default for TargetConfig {
    fn default() -> Self {
        let breaker = BreakerConfig::default();
        Self {
            failure_threshold: breaker.failure_threshold,
            reset_timeout_secs: breaker.reset_timeout.as_secs(),
            max_retries: 3,
            attempt_timeout_secs: None,
            failure_policy: FailurePolicy::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl TargetConfig {
    #[must_use]
    pub const fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_secs(self.reset_timeout_secs),
        }
    }

    /// Caller builder preloaded with these settings
    pub fn caller_builder(&self, label: impl Into<String>) -> ResilientCallerBuilder {
        let builder = ResilientCaller::builder(label)
            .breaker_config(self.breaker_config())
            .max_retries(self.max_retries)
            .failure_policy(self.failure_policy)
            .backoff_arc(Arc::from(self.backoff.build()));

        match self.attempt_timeout_secs {
            Some(secs) => builder.attempt_timeout(Duration::from_secs(secs)),
            None => builder,
        }
    }

    fn validate(&self, scope: &str) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::configuration(
                format!("{scope}.failure_threshold"),
                "must be a positive integer",
            ));
        }
        if self.reset_timeout_secs == 0 {
            return Err(Error::configuration(
                format!("{scope}.reset_timeout_secs"),
                "must be greater than zero",
            ));
        }
        if self.max_retries == 0 {
            return Err(Error::configuration(
                format!("{scope}.max_retries"),
                "must be at least 1",
            ));
        }
        if self.attempt_timeout_secs == Some(0) {
            return Err(Error::configuration(
                format!("{scope}.attempt_timeout_secs"),
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingConfig,
    pub http: HttpClientConfig,
    /// Used for labels without their own table
    pub defaults: TargetConfig,
    pub targets: HashMap<String, TargetConfig>,
}

impl Settings {
    /// Load settings from an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from TOML text, without environment overrides
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Self = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.http.timeout_secs == 0 {
            return Err(Error::configuration("http.timeout_secs", "must be greater than zero"));
        }
        if self.http.connect_timeout_secs == 0 {
            return Err(Error::configuration(
                "http.connect_timeout_secs",
                "must be greater than zero",
            ));
        }

        self.defaults.validate("defaults")?;
        for (label, target) in &self.targets {
            if label.trim().is_empty() {
                return Err(Error::configuration("targets", "label must not be empty"));
            }
            target.validate(&format!("targets.{label}"))?;
        }
        Ok(())
    }

    /// Settings for `label`, falling back to `defaults`
    #[must_use]
    pub fn target(&self, label: &str) -> &TargetConfig {
        self.targets.get(label).unwrap_or(&self.defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_surface() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());

        let target = settings.target("anything");
        assert_eq!(target.failure_threshold, 3);
        assert_eq!(target.reset_timeout_secs, 60);
        assert_eq!(target.max_retries, 3);
        assert_eq!(target.failure_policy, FailurePolicy::TransportOnly);
        assert_eq!(target.backoff.build().delay(1), Duration::from_secs(2));
    }

    #[test]
    fn test_from_toml_with_targets() {
        let settings = Settings::from_toml(
            r#"
            [logging]
            format = "json"

            [defaults]
            max_retries = 5

            [targets.payments-api]
            failure_threshold = 1
            reset_timeout_secs = 2
            failure_policy = "transport_and_server_errors"
            backoff = { kind = "constant", delay_ms = 10 }
            "#,
        )
        .unwrap();

        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.target("other").max_retries, 5);

        let payments = settings.target("payments-api");
        assert_eq!(payments.failure_threshold, 1);
        assert_eq!(
            payments.breaker_config().reset_timeout,
            Duration::from_secs(2)
        );
        assert_eq!(
            payments.failure_policy,
            FailurePolicy::TransportAndServerErrors
        );
        assert_eq!(payments.backoff.build().delay(7), Duration::from_millis(10));
    }

    #[test]
    fn test_invalid_values_fail_fast() {
        let result = Settings::from_toml("[defaults]\nmax_retries = 0");
        assert!(matches!(
            result,
            Err(Error::Configuration { field, .. }) if field == "defaults.max_retries"
        ));

        let result = Settings::from_toml("[targets.svc]\nfailure_threshold = 0");
        assert!(matches!(
            result,
            Err(Error::Configuration { field, .. }) if field == "targets.svc.failure_threshold"
        ));

        let result = Settings::from_toml("[defaults]\nmax_retries = \"many\"");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[http]\ntimeout_secs = 5\n\n[targets.search]\nmax_retries = 2").unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.http.timeout_secs, 5);
        assert_eq!(settings.target("search").max_retries, 2);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = Settings::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_caller_builder_uses_target_settings() {
        let settings =
            Settings::from_toml("[targets.svc]\nfailure_threshold = 7\nmax_retries = 4").unwrap();
        let registry = crate::BreakerRegistry::new();

        let caller = settings
            .target("svc")
            .caller_builder("svc")
            .build(&registry)
            .await
            .unwrap();

        assert_eq!(caller.max_retries(), 4);
        assert_eq!(caller.breaker().config().failure_threshold, 7);
    }
}
