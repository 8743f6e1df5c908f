use crate::resilience::circuit_breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Label-keyed store of shared circuit breakers
///
/// Owned by the application's composition root and handed to every
/// [`ResilientCaller`](crate::ResilientCaller). Callers built with the same
/// label get the same breaker.
///
/// Thresholds are fixed by the first caller for a label: later
/// [`get_or_create`](Self::get_or_create) calls return the existing breaker
/// and ignore the configuration they pass.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the breaker for `label`, creating it with `config` on first use
    pub async fn get_or_create(
        &self,
        label: &str,
        config: BreakerConfig,
    ) -> Result<Arc<CircuitBreaker>> {
        if let Some(breaker) = self.breakers.read().await.get(label) {
            Self::note_ignored_config(breaker, &config);
            return Ok(Arc::clone(breaker));
        }

        let mut breakers = self.breakers.write().await;

        // Another task may have created it between the two locks
        if let Some(breaker) = breakers.get(label) {
            Self::note_ignored_config(breaker, &config);
            return Ok(Arc::clone(breaker));
        }

        let breaker = Arc::new(CircuitBreaker::new(label, config)?);
        breakers.insert(label.to_string(), Arc::clone(&breaker));
        info!(
            label,
            failure_threshold = config.failure_threshold,
            reset_timeout_secs = config.reset_timeout.as_secs_f64(),
            "Created circuit breaker"
        );
        Ok(breaker)
    }

    fn note_ignored_config(breaker: &CircuitBreaker, requested: &BreakerConfig) {
        if breaker.config() != requested {
            debug!(
                label = breaker.label(),
                "Circuit breaker already exists, ignoring supplied thresholds"
            );
        }
    }

    /// Breaker for `label`, if one was created
    pub async fn get(&self, label: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().await.get(label).cloned()
    }

    /// Labels with a breaker, sorted
    pub async fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.breakers.read().await.keys().cloned().collect();
        labels.sort();
        labels
    }

    /// Get health status of all circuit breakers
    pub async fn health_status(&self) -> HashMap<String, bool> {
        let mut status = HashMap::new();

        for (label, breaker) in self.breakers.read().await.iter() {
            status.insert(label.clone(), breaker.snapshot().is_healthy());
        }

        status
    }

    /// Snapshots of all circuit breakers
    pub async fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> = self
            .breakers
            .read()
            .await
            .values()
            .map(|breaker| breaker.snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.label.cmp(&b.label));
        snapshots
    }

    /// Reset a specific circuit breaker
    pub async fn reset(&self, label: &str) -> Result<()> {
        self.lookup(label).await?.reset();
        Ok(())
    }

    /// Reset all circuit breakers
    pub async fn reset_all(&self) {
        for breaker in self.breakers.read().await.values() {
            breaker.reset();
        }
    }

    /// Force a circuit breaker to open (for testing or maintenance)
    pub async fn force_open(&self, label: &str) -> Result<()> {
        self.lookup(label).await?.force_open();
        Ok(())
    }

    async fn lookup(&self, label: &str) -> Result<Arc<CircuitBreaker>> {
        self.get(label).await.ok_or_else(|| {
            warn!(label, "Circuit breaker not found");
            Error::UnknownTarget {
                label: label.to_string(),
            }
        })
    }
}
