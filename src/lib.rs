pub mod config;
pub mod error;
pub mod logging;
pub mod resilience;
pub mod telemetry;
pub mod transport;

pub use config::{Settings, TargetConfig};
pub use error::{Error, ErrorCategory, Result};
pub use resilience::{
    BackoffPolicy, BreakerConfig, BreakerPermit, BreakerRegistry, CircuitBreaker, CircuitState,
    FailurePolicy, ResilientCaller, ResilientCallerBuilder,
};
pub use telemetry::{NoopTelemetry, PrometheusTelemetry, Telemetry};
pub use transport::{
    Body, HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError,
};
