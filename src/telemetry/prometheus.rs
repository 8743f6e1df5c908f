//! Request and retry metrics through the `metrics` facade.
//!
//! # Metrics
//! - `http_requests_total` (counter): calls by method, status code
//! - `http_request_duration_seconds` (histogram): call latency
//! - `http_request_retries_total` (counter): retries by method

use super::Telemetry;
use crate::transport::HttpMethod;
use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

const REQUESTS_TOTAL: &str = "http_requests_total";
const REQUEST_DURATION: &str = "http_request_duration_seconds";
const RETRIES_TOTAL: &str = "http_request_retries_total";

/// [`Telemetry`] sink recording into whatever `metrics` recorder is active
#[derive(Debug, Clone, Default)]
pub struct PrometheusTelemetry {
    target: Option<String>,
}

impl PrometheusTelemetry {
    #[must_use]
    pub const fn new() -> Self {
        Self { target: None }
    }

    /// Add a `target` label carrying the caller's label to every metric
    #[must_use]
    pub fn with_target(mut self, label: impl Into<String>) -> Self {
        self.target = Some(label.into());
        self
    }

    /// Install a global Prometheus recorder and describe the metrics
    ///
    /// The returned handle renders the exposition text.
    pub fn install() -> Result<PrometheusHandle> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| Error::configuration("metrics", e.to_string()))?;
        describe();
        Ok(handle)
    }

    fn labels(&self, method: HttpMethod) -> Vec<(&'static str, String)> {
        let mut labels = vec![("method", method.as_str().to_string())];
        if let Some(target) = &self.target {
            labels.push(("target", target.clone()));
        }
        labels
    }
}

/// Register help text for the metrics with the active recorder
pub fn describe() {
    metrics::describe_counter!(REQUESTS_TOTAL, "Total number of requests");
    metrics::describe_histogram!(
        REQUEST_DURATION,
        metrics::Unit::Seconds,
        "Time spent processing request"
    );
    metrics::describe_counter!(RETRIES_TOTAL, "Total number of retries");
}

impl Telemetry for PrometheusTelemetry {
    fn record_request(&self, method: HttpMethod, status_code: u16, elapsed: Duration) {
        let mut labels = self.labels(method);
        labels.push(("status_code", status_code.to_string()));

        metrics::counter!(REQUESTS_TOTAL, &labels).increment(1);
        metrics::histogram!(REQUEST_DURATION, &labels).record(elapsed.as_secs_f64());
    }

    fn record_retry(&self, method: HttpMethod) {
        let labels = self.labels(method);
        metrics::counter!(RETRIES_TOTAL, &labels).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_with(record: impl FnOnce()) -> String {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, record);
        handle.render()
    }

    #[test]
    fn test_track_request() {
        let output = render_with(|| {
            PrometheusTelemetry::new().record_request(
                HttpMethod::Get,
                200,
                Duration::from_millis(1500),
            );
        });

        assert!(output.contains("http_requests_total{"));
        assert!(output.contains("method=\"GET\""));
        assert!(output.contains("status_code=\"200\""));
        assert!(output.contains("http_request_duration_seconds_sum"));
        assert!(output.contains("1.5"));
    }

    #[test]
    fn test_track_retry_with_target() {
        let output = render_with(|| {
            let telemetry = PrometheusTelemetry::new().with_target("payments-api");
            telemetry.record_retry(HttpMethod::Post);
            telemetry.record_retry(HttpMethod::Post);
        });

        assert!(output.contains("http_request_retries_total"));
        assert!(output.contains("target=\"payments-api\""));
        assert!(output
            .lines()
            .any(|line| line.starts_with("http_request_retries_total{") && line.ends_with(" 2")));
    }
}
