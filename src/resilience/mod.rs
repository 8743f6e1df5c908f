//! # Resilient-call engine
//!
//! ```text
//! ResilientCaller::execute
//!     → CircuitBreaker::try_acquire    (shared per label via BreakerRegistry)
//!     → Transport::send
//!     → BreakerPermit::success / failure
//!     → return, fail fast if the breaker opened,
//!       or sleep BackoffPolicy::delay(attempt) and try again
//! ```

pub mod backoff;
pub mod caller;
pub mod circuit_breaker;
pub mod registry;

pub use backoff::{BackoffConfig, BackoffPolicy, Constant, Exponential, Linear};
pub use caller::{FailurePolicy, ResilientCaller, ResilientCallerBuilder};
pub use circuit_breaker::{
    BreakerConfig, BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitState,
};
pub use registry::BreakerRegistry;
