use crate::resilience::backoff::{BackoffPolicy, Exponential};
use crate::resilience::circuit_breaker::{BreakerConfig, CircuitBreaker};
use crate::resilience::registry::BreakerRegistry;
use crate::telemetry::{
    AttemptOutcome, AttemptRecord, NoopTelemetry, Telemetry, BREAKER_OPEN_STATUS,
    CANCELLED_STATUS, TRANSPORT_FAILURE_STATUS,
};
use crate::transport::{
    HttpClientConfig, HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport,
    TransportError,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Which responses count against the breaker and get retried
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Only transport errors are failures; any HTTP status is returned as-is
    #[default]
    TransportOnly,
    /// 5xx responses are failures as well
    TransportAndServerErrors,
}

impl FailurePolicy {
    #[must_use]
    pub const fn counts_as_failure(self, response: &HttpResponse) -> bool {
        match self {
            Self::TransportOnly => false,
            Self::TransportAndServerErrors => response.is_server_error(),
        }
    }
}

/// Builder for [`ResilientCaller`]
pub struct ResilientCallerBuilder {
    label: String,
    breaker: BreakerConfig,
    max_retries: u32,
    attempt_timeout: Option<Duration>,
    failure_policy: FailurePolicy,
    backoff: Arc<dyn BackoffPolicy>,
    telemetry: Arc<dyn Telemetry>,
    transport: Option<Arc<dyn Transport>>,
}

impl ResilientCallerBuilder {
    fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            breaker: BreakerConfig::default(),
            max_retries: 3,
            attempt_timeout: None,
            failure_policy: FailurePolicy::default(),
            backoff: Arc::new(Exponential::default()),
            telemetry: Arc::new(NoopTelemetry),
            transport: None,
        }
    }

    /// Only used if this caller is the first for its label
    #[must_use]
    pub const fn failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.breaker.failure_threshold = failure_threshold;
        self
    }

    /// Only used if this caller is the first for its label
    #[must_use]
    pub const fn reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.breaker.reset_timeout = reset_timeout;
        self
    }

    #[must_use]
    pub const fn breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    /// Total attempts per call, including the first one
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Deadline for a single transport call
    #[must_use]
    pub const fn attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = Some(attempt_timeout);
        self
    }

    #[must_use]
    pub const fn failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    #[must_use]
    pub fn backoff(mut self, backoff: impl BackoffPolicy + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    #[must_use]
    pub fn backoff_arc(mut self, backoff: Arc<dyn BackoffPolicy>) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validate the settings and attach the shared breaker for the label
    ///
    /// Falls back to a [`ReqwestTransport`] with default settings when no
    /// transport was supplied.
    pub async fn build(self, registry: &BreakerRegistry) -> Result<ResilientCaller> {
        if self.label.trim().is_empty() {
            return Err(Error::configuration("label", "must not be empty"));
        }
        if self.max_retries == 0 {
            return Err(Error::configuration("max_retries", "must be at least 1"));
        }
        if self.attempt_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::configuration(
                "attempt_timeout",
                "must be greater than zero",
            ));
        }
        self.breaker.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&HttpClientConfig::default())?),
        };
        let breaker = registry.get_or_create(&self.label, self.breaker).await?;

        Ok(ResilientCaller {
            label: self.label,
            max_retries: self.max_retries,
            attempt_timeout: self.attempt_timeout,
            failure_policy: self.failure_policy,
            breaker,
            backoff: self.backoff,
            telemetry: self.telemetry,
            transport,
        })
    }
}

/// HTTP caller combining bounded retries with a shared circuit breaker
///
/// Attempts of one call are strictly sequential. Before each attempt the
/// breaker is consulted; a rejection ends the call with
/// [`Error::CircuitOpen`] whatever retry budget is left. A failed attempt
/// that leaves the breaker open ends the call the same way, without a retry
/// event or a backoff sleep.
#[derive(Clone)]
pub struct ResilientCaller {
    label: String,
    max_retries: u32,
    attempt_timeout: Option<Duration>,
    failure_policy: FailurePolicy,
    breaker: Arc<CircuitBreaker>,
    backoff: Arc<dyn BackoffPolicy>,
    telemetry: Arc<dyn Telemetry>,
    transport: Arc<dyn Transport>,
}

impl ResilientCaller {
    pub fn builder(label: impl Into<String>) -> ResilientCallerBuilder {
        ResilientCallerBuilder::new(label)
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// The breaker shared with every caller using the same label
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.execute(HttpRequest::new(HttpMethod::Get, url)).await
    }

    pub async fn post<T: Serialize + ?Sized>(&self, url: &str, data: &T) -> Result<HttpResponse> {
        self.send_json(HttpMethod::Post, url, data).await
    }

    pub async fn put<T: Serialize + ?Sized>(&self, url: &str, data: &T) -> Result<HttpResponse> {
        self.send_json(HttpMethod::Put, url, data).await
    }

    pub async fn patch<T: Serialize + ?Sized>(&self, url: &str, data: &T) -> Result<HttpResponse> {
        self.send_json(HttpMethod::Patch, url, data).await
    }

    pub async fn delete(&self, url: &str) -> Result<HttpResponse> {
        self.execute(HttpRequest::new(HttpMethod::Delete, url)).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        url: &str,
        data: &T,
    ) -> Result<HttpResponse> {
        let request = HttpRequest::new(method, url).with_json(serde_json::to_value(data)?);
        self.execute(request).await
    }

    /// Execute a request that cannot be cancelled from outside
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.execute_with_cancellation(request, &CancellationToken::new())
            .await
    }

    /// Execute a request, aborting promptly once `cancel` fires
    ///
    /// A cancelled attempt is reported to the breaker as neither success nor
    /// failure. The same holds when the returned future is dropped.
    pub async fn execute_with_cancellation(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let started = Instant::now();
        let method = request.method;
        let url = request.url.as_str();

        info!(label = %self.label, %method, url, "Dispatching request");

        let mut attempt = 0;
        while attempt < self.max_retries {
            attempt += 1;

            if cancel.is_cancelled() {
                return Err(self.cancelled(method, attempt, started));
            }

            let Some(permit) = self.breaker.try_acquire() else {
                self.record_attempt(method, attempt, started, AttemptOutcome::Rejected);
                error!(
                    label = %self.label,
                    %method,
                    url,
                    attempt,
                    "Circuit breaker open, call rejected"
                );
                return Err(self.circuit_open(method, started));
            };

            info!(
                label = %self.label,
                %method,
                url,
                attempt,
                trial = permit.is_trial(),
                "Attempt dispatched"
            );

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = self.send_once(&request) => Some(result),
            };
            let Some(result) = result else {
                drop(permit);
                return Err(self.cancelled(method, attempt, started));
            };

            let (state, err, status) = match result {
                Ok(response) if !self.failure_policy.counts_as_failure(&response) => {
                    permit.success();
                    let status = response.status;
                    self.record_attempt(
                        method,
                        attempt,
                        started,
                        AttemptOutcome::Success { status },
                    );
                    info!(
                        label = %self.label,
                        %method,
                        url,
                        attempt,
                        status_code = status,
                        "Response received"
                    );
                    self.telemetry
                        .record_request(method, status, started.elapsed());
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status;
                    let state = permit.failure();
                    self.record_attempt(
                        method,
                        attempt,
                        started,
                        AttemptOutcome::StatusFailure { status },
                    );
                    warn!(
                        label = %self.label,
                        %method,
                        url,
                        attempt,
                        status_code = status,
                        "Attempt failed with server error"
                    );
                    (
                        state,
                        Error::UnexpectedStatus {
                            label: self.label.clone(),
                            status,
                            attempts: attempt,
                        },
                        status,
                    )
                }
                Err(err) => {
                    let state = permit.failure();
                    self.record_attempt(method, attempt, started, AttemptOutcome::TransportFailure);
                    error!(
                        label = %self.label,
                        %method,
                        url,
                        attempt,
                        error = %err,
                        "Attempt failed"
                    );
                    (
                        state,
                        Error::Transport {
                            label: self.label.clone(),
                            attempts: attempt,
                            source: err,
                        },
                        TRANSPORT_FAILURE_STATUS,
                    )
                }
            };

            // The remaining budget is abandoned once the breaker is open
            if state.is_open() {
                error!(
                    label = %self.label,
                    %method,
                    url,
                    attempt,
                    "Circuit breaker opened, giving up on remaining retries"
                );
                return Err(self.circuit_open(method, started));
            }

            if attempt == self.max_retries {
                error!(label = %self.label, %method, url, attempt, "Retries exhausted");
                self.telemetry
                    .record_request(method, status, started.elapsed());
                return Err(err);
            }

            self.telemetry.record_retry(method);
            let delay = self.backoff.delay(attempt);
            debug!(
                label = %self.label,
                attempt,
                delay_ms = delay.as_millis(),
                "Backing off before retry"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(self.cancelled(method, attempt, started)),
                () = sleep(delay) => {}
            }
        }

        unreachable!("max_retries is validated to be at least 1")
    }

    async fn send_once(
        &self,
        request: &HttpRequest,
    ) -> std::result::Result<HttpResponse, TransportError> {
        match self.attempt_timeout {
            Some(limit) => match timeout(limit, self.transport.send(request)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(format!(
                    "no response within {limit:?}"
                ))),
            },
            None => self.transport.send(request).await,
        }
    }

    fn circuit_open(&self, method: HttpMethod, started: Instant) -> Error {
        self.telemetry
            .record_request(method, BREAKER_OPEN_STATUS, started.elapsed());
        Error::CircuitOpen {
            label: self.label.clone(),
        }
    }

    fn cancelled(&self, method: HttpMethod, attempt: u32, started: Instant) -> Error {
        self.record_attempt(method, attempt, started, AttemptOutcome::Cancelled);
        error!(label = %self.label, %method, attempt, "Call cancelled");
        self.telemetry
            .record_request(method, CANCELLED_STATUS, started.elapsed());
        Error::Cancelled {
            label: self.label.clone(),
        }
    }

    fn record_attempt(
        &self,
        method: HttpMethod,
        attempt: u32,
        started: Instant,
        outcome: AttemptOutcome,
    ) {
        self.telemetry.record_attempt(&AttemptRecord {
            method,
            attempt,
            elapsed: started.elapsed(),
            outcome,
        });
    }
}
