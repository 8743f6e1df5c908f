//! # Telemetry
//!
//! Request and retry events emitted by the resilient caller. The caller
//! always holds a sink; [`NoopTelemetry`] stands in when nothing is
//! configured.

mod prometheus;

pub use prometheus::PrometheusTelemetry;

use crate::transport::HttpMethod;
use std::time::Duration;

/// Status reported when the breaker rejected the call
pub const BREAKER_OPEN_STATUS: u16 = 503;
/// Status reported when every attempt failed below the HTTP layer
pub const TRANSPORT_FAILURE_STATUS: u16 = 502;
/// Status reported when the caller cancelled the call
pub const CANCELLED_STATUS: u16 = 499;

/// Outcome of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success { status: u16 },
    /// Response received but counted as a failure by the failure policy
    StatusFailure { status: u16 },
    TransportFailure,
    Rejected,
    Cancelled,
}

/// Per-attempt record, handed to [`Telemetry::record_attempt`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptRecord {
    pub method: HttpMethod,
    pub attempt: u32,
    /// Time since the call started
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
}

/// Sink for request and retry events
pub trait Telemetry: Send + Sync {
    /// A call finished, successfully or not
    fn record_request(&self, method: HttpMethod, status_code: u16, elapsed: Duration);

    /// A failed attempt is about to be retried
    fn record_retry(&self, method: HttpMethod);

    fn record_attempt(&self, _record: &AttemptRecord) {}
}

/// Telemetry sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn record_request(&self, _method: HttpMethod, _status_code: u16, _elapsed: Duration) {}

    fn record_retry(&self, _method: HttpMethod) {}
}
