use crate::{Error, Result};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally
    Closed,
    /// Circuit is open - requests are rejected immediately
    Open { opened_at: Instant },
    /// Circuit is half-open - a single trial request tests recovery
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open { .. } => "open",
            Self::HalfOpen => "half_open",
        }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time to wait before transitioning from open to half-open
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(Error::configuration(
                "failure_threshold",
                "must be a positive integer",
            ));
        }
        if self.reset_timeout.is_zero() {
            return Err(Error::configuration(
                "reset_timeout",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// How a call got past the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Admitted while closed
    Regular,
    /// Owns the half-open trial with this generation
    Trial(u64),
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    trial_in_flight: bool,
    trial_generation: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl BreakerInner {
    /// Whether an outcome from `admission` decides the current trial.
    /// `None` is an outcome reported without a permit.
    fn owns_trial(&self, admission: Option<Admission>) -> bool {
        match admission {
            None => true,
            Some(Admission::Trial(generation)) => {
                self.trial_in_flight && self.trial_generation == generation
            }
            Some(Admission::Regular) => false,
        }
    }
}

/// Per-target circuit breaker
///
/// All transitions happen under one lock, so concurrent callers sharing a
/// breaker cannot race a transition. The lock is never held across an
/// await point.
///
/// Half-open trials are serialized: the caller whose admission performs the
/// open to half-open transition owns the trial and everybody else is
/// rejected until it reports back. [`try_acquire`](Self::try_acquire)
/// hands out a [`BreakerPermit`] that gives an unreported trial back when
/// dropped, so an abandoned call cannot wedge the breaker half-open.
#[derive(Debug)]
pub struct CircuitBreaker {
    label: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker in the closed state
    pub fn new(label: impl Into<String>, config: BreakerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            label: label.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                trial_in_flight: false,
                trial_generation: 0,
                total_successes: 0,
                total_failures: 0,
                total_rejections: 0,
            }),
        })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub const fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Ask permission for one call
    ///
    /// Returns `None` when the call must be rejected. The permit reports the
    /// call's outcome; dropping it unreported releases a held half-open
    /// trial without counting anything.
    #[must_use]
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        self.admit().map(|admission| BreakerPermit {
            breaker: self,
            admission,
            settled: false,
        })
    }

    /// Whether a call may proceed right now
    ///
    /// Performs the open to half-open transition once `reset_timeout` has
    /// elapsed. A rejection is not counted as a failure. A trial granted
    /// here must be settled with [`report_success`](Self::report_success),
    /// [`report_failure`](Self::report_failure) or
    /// [`release_trial`](Self::release_trial); prefer
    /// [`try_acquire`](Self::try_acquire), which does that on drop.
    #[must_use]
    pub fn allow(&self) -> bool {
        self.admit().is_some()
    }

    fn admit(&self) -> Option<Admission> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Some(Admission::Regular),
            CircuitState::Open { opened_at } => {
                if opened_at.elapsed() >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    Some(self.start_trial(&mut inner))
                } else {
                    inner.total_rejections += 1;
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.total_rejections += 1;
                    None
                } else {
                    Some(self.start_trial(&mut inner))
                }
            }
        }
    }

    fn start_trial(&self, inner: &mut BreakerInner) -> Admission {
        inner.trial_in_flight = true;
        inner.trial_generation += 1;
        info!(label = %self.label, "Circuit breaker admitting Half-Open trial");
        Admission::Trial(inner.trial_generation)
    }

    /// Apply the success transition for the current state
    pub fn report_success(&self) {
        self.settle(None, true);
    }

    /// Apply the failure transition for the current state
    pub fn report_failure(&self) {
        self.settle(None, false);
    }

    fn settle(&self, admission: Option<Admission>, success: bool) -> CircuitState {
        let mut inner = self.inner.lock();

        if success {
            inner.total_successes += 1;
        } else {
            inner.total_failures += 1;
        }

        match (inner.state, success) {
            (CircuitState::Closed, true) => inner.consecutive_failures = 0,
            (CircuitState::Closed, false) => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open {
                        opened_at: Instant::now(),
                    };
                    warn!(
                        label = %self.label,
                        failures = inner.consecutive_failures,
                        "Circuit breaker opening"
                    );
                }
            }
            (CircuitState::HalfOpen, _) if !inner.owns_trial(admission) => {
                debug!(label = %self.label, "Outcome of a non-trial call ignored while Half-Open");
            }
            (CircuitState::HalfOpen, true) => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.trial_in_flight = false;
                info!(
                    label = %self.label,
                    "Circuit breaker transitioning from Half-Open to Closed"
                );
            }
            (CircuitState::HalfOpen, false) => {
                inner.state = CircuitState::Open {
                    opened_at: Instant::now(),
                };
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.trial_in_flight = false;
                warn!(
                    label = %self.label,
                    "Circuit breaker returning to Open after failed trial"
                );
            }
            (CircuitState::Open { .. }, _) => {
                // Admitted before the trip and finished late; the open
                // window keeps running.
                debug!(label = %self.label, "Ignoring outcome reported while Open");
            }
        }

        inner.state
    }

    /// Give back a half-open trial slot without an outcome
    ///
    /// The breaker stays half-open and the next caller may try again.
    pub fn release_trial(&self) {
        self.abandon(None);
    }

    fn abandon(&self, admission: Option<Admission>) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.owns_trial(admission) {
            inner.trial_in_flight = false;
            debug!(label = %self.label, "Half-open trial released without outcome");
        }
    }

    /// Get current circuit breaker state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Get a point-in-time view of the breaker
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();

        BreakerSnapshot {
            label: self.label.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            reset_timeout: self.config.reset_timeout,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            total_rejections: inner.total_rejections,
        }
    }

    /// Reset circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.inner.lock();

        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;

        info!(label = %self.label, "Circuit breaker reset to Closed");
    }

    /// Force circuit breaker to open state
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();

        inner.state = CircuitState::Open {
            opened_at: Instant::now(),
        };
        inner.trial_in_flight = false;

        warn!(label = %self.label, "Circuit breaker forced Open");
    }
}

/// Permission for one call through a [`CircuitBreaker`]
///
/// Consumed by [`success`](Self::success) or [`failure`](Self::failure).
/// Dropped without either, it counts as neither and gives back the
/// half-open trial it holds, if any.
#[derive(Debug)]
#[must_use = "dropping a permit discards the call's outcome"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Whether this permit holds the half-open trial
    #[must_use]
    pub const fn is_trial(&self) -> bool {
        matches!(self.admission, Admission::Trial(_))
    }

    /// Report a successful call
    pub fn success(mut self) -> CircuitState {
        self.settled = true;
        self.breaker.settle(Some(self.admission), true)
    }

    /// Report a failed call, returning the breaker state afterwards
    pub fn failure(mut self) -> CircuitState {
        self.settled = true;
        self.breaker.settle(Some(self.admission), false)
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.abandon(Some(self.admission));
        }
    }
}

/// Public view of a breaker
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub label: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

impl BreakerSnapshot {
    /// Check if circuit breaker is healthy
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self.state, CircuitState::Closed)
    }

    /// Get failure rate as percentage of reported outcomes
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_rate(&self) -> f64 {
        let total = self.total_successes + self.total_failures;
        if total == 0 {
            0.0
        } else {
            (self.total_failures as f64 / total as f64) * 100.0
        }
    }
}
