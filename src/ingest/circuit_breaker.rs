// src/ingest/circuit_breaker.rs
//! Per-source circuit breaker.
//!
//! Every failed fetch bumps a consecutive-failure counter stored under
//! `circuit:{url}`. Once the counter reaches the threshold the source is
//! skipped until `skip_until`. A successful fetch clears the state.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::config::BreakerConfig;
use crate::store::{CircuitState, Ledger, StoreError};

#[derive(Clone)]
pub struct CircuitBreaker {
    ledger: Ledger,
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(ledger: Ledger, config: BreakerConfig) -> Self {
        Self { ledger, config }
    }

    pub async fn is_open(&self, source_url: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self.ledger.circuit_state(source_url).await?.is_open(now))
    }

    pub async fn record_failure(
        &self,
        source_url: &str,
        now: DateTime<Utc>,
    ) -> Result<CircuitState, StoreError> {
        let prev = self.ledger.circuit_state(source_url).await?;
        let failed_count = prev.failed_count.saturating_add(1);
        let skip_until = (failed_count >= self.config.failure_threshold)
            .then(|| now + ChronoDuration::seconds(self.config.cooldown_secs));

        let state = CircuitState {
            failed_count,
            last_failure: Some(now),
            skip_until,
        };
        self.ledger.set_circuit_state(source_url, &state).await?;

        if skip_until.is_some() {
            tracing::warn!(
                target: "ingest",
                source = source_url,
                failed_count,
                "circuit opened"
            );
        }
        Ok(state)
    }

    pub async fn record_success(&self, source_url: &str) -> Result<(), StoreError> {
        self.ledger.clear_circuit(source_url).await
    }
}
