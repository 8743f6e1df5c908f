use crate::transport::TransportError;
use thiserror::Error;

/// Error taxonomy for resilient calls
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (permanent failures, raised at construction)
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {field} - {reason}")]
    Configuration { field: String, reason: String },

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors (usually permanent)
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    // Circuit breaker errors
    #[error("Circuit breaker open for target: {label}")]
    CircuitOpen { label: String },

    // Transport errors that survived every retry
    #[error("Target {label} unreachable after {attempts} attempt(s): {source}")]
    Transport {
        label: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("Target {label} answered {status} after {attempts} attempt(s)")]
    UnexpectedStatus {
        label: String,
        status: u16,
        attempts: u32,
    },

    #[error("Call to {label} was cancelled")]
    Cancelled { label: String },

    #[error("No circuit breaker registered for target: {label}")]
    UnknownTarget { label: String },
}

/// Error categorization for upstream retry strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Permanent errors - should not retry
    Permanent,
    /// Transient errors - safe to retry at a higher layer
    Transient,
    /// Circuit breaker triggered - fail fast or fall back
    CircuitBreaker,
    /// Caller gave up on the call
    Cancelled,
}

impl Error {
    pub(crate) fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Categorize error for retry logic
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_)
            | Self::Configuration { .. }
            | Self::Serde(_)
            | Self::UnknownTarget { .. } => ErrorCategory::Permanent,

            Self::CircuitOpen { .. } => ErrorCategory::CircuitBreaker,

            Self::Cancelled { .. } => ErrorCategory::Cancelled,

            Self::Transport { .. } | Self::UnexpectedStatus { .. } | Self::Io(_) => {
                ErrorCategory::Transient
            }
        }
    }

    /// Check if error is retryable by the caller
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }

    /// Label of the target the error refers to, if any
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::CircuitOpen { label }
            | Self::Transport { label, .. }
            | Self::UnexpectedStatus { label, .. }
            | Self::Cancelled { label }
            | Self::UnknownTarget { label } => Some(label),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
