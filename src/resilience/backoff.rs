//! Backoff policies mapping a retry attempt to a wait duration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay inserted before the next attempt
///
/// `attempt` is the number of the attempt that just failed and is always
/// at least 1. Implementations must be deterministic.
pub trait BackoffPolicy: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

impl<F> BackoffPolicy for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn delay(&self, attempt: u32) -> Duration {
        self(attempt)
    }
}

/// `unit * 2^attempt`, optionally capped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exponential {
    pub unit: Duration,
    pub max: Option<Duration>,
}

impl Exponential {
    #[must_use]
    pub const fn new(unit: Duration) -> Self {
        Self { unit, max: None }
    }

    #[must_use]
    pub const fn with_max(mut self, max: Duration) -> Self {
        self.max = Some(max);
        self
    }
}

impl Default for Exponential {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl BackoffPolicy for Exponential {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self.unit.saturating_mul(factor);
        self.max.map_or(delay, |max| delay.min(max))
    }
}

/// `attempt * step`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Linear {
    pub step: Duration,
}

impl BackoffPolicy for Linear {
    fn delay(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt)
    }
}

/// Same delay before every retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constant {
    pub delay: Duration,
}

impl BackoffPolicy for Constant {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Serializable backoff selection used by configuration files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    Exponential {
        #[serde(default = "default_unit_ms")]
        unit_ms: u64,
        #[serde(default)]
        max_ms: Option<u64>,
    },
    Linear {
        step_ms: u64,
    },
    Constant {
        delay_ms: u64,
    },
}

const fn default_unit_ms() -> u64 {
    1000
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::Exponential {
            unit_ms: default_unit_ms(),
            max_ms: None,
        }
    }
}

impl BackoffConfig {
    /// Build the policy this configuration describes
    #[must_use]
    pub fn build(&self) -> Box<dyn BackoffPolicy> {
        match *self {
            Self::Exponential { unit_ms, max_ms } => {
                let policy = Exponential::new(Duration::from_millis(unit_ms));
                Box::new(match max_ms {
                    Some(max) => policy.with_max(Duration::from_millis(max)),
                    None => policy,
                })
            }
            Self::Linear { step_ms } => Box::new(Linear {
                step: Duration::from_millis(step_ms),
            }),
            Self::Constant { delay_ms } => Box::new(Constant {
                delay: Duration::from_millis(delay_ms),
            }),
        }
    }
}
