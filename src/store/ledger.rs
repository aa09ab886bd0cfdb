// src/store/ledger.rs
//! Typed access to the idempotency ledgers, circuit-breaker state and the
//! health record. Key layout:
//!
//! - `news:dispatched:{fingerprint}`
//! - `news:delivered:{fingerprint}:{chat_id}`
//! - `circuit:{source_url}`
//! - `health:last_successful_run`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{get_json, set_json, KvStore, StoreError};
use crate::article::{ImpactCategory, SourceTier};
use crate::config::TtlConfig;

pub const HEALTH_KEY: &str = "health:last_successful_run";

pub fn dispatched_key(fingerprint: &str) -> String {
    format!("news:dispatched:{fingerprint}")
}

pub fn delivered_key(fingerprint: &str, chat_id: &str) -> String {
    format!("news:delivered:{fingerprint}:{chat_id}")
}

pub fn circuit_key(source: &str) -> String {
    format!("circuit:{source}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchedMarker {
    pub sent_timestamp: DateTime<Utc>,
    pub impact_category: ImpactCategory,
    pub source_tier: SourceTier,
    #[serde(default)]
    pub topic_tags: Vec<String>,
    pub execution_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryMarker {
    pub sent_timestamp: DateTime<Utc>,
    pub execution_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitState {
    pub failed_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub skip_until: Option<DateTime<Utc>>,
}

impl CircuitState {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.skip_until.is_some_and(|t| now < t)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub execution_id: String,
}

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn KvStore>,
    ttl: TtlConfig,
}

impl Ledger {
    pub fn new(store: Arc<dyn KvStore>, ttl: TtlConfig) -> Self {
        Self { store, ttl }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub async fn is_dispatched(&self, fingerprint: &str) -> Result<bool, StoreError> {
        self.store.exists(&dispatched_key(fingerprint)).await
    }

    pub async fn dispatched_marker(
        &self,
        fingerprint: &str,
    ) -> Result<Option<DispatchedMarker>, StoreError> {
        get_json(self.store.as_ref(), &dispatched_key(fingerprint)).await
    }

    pub async fn mark_dispatched(
        &self,
        fingerprint: &str,
        marker: &DispatchedMarker,
    ) -> Result<(), StoreError> {
        set_json(
            self.store.as_ref(),
            &dispatched_key(fingerprint),
            marker,
            Some(Duration::from_secs(self.ttl.dispatched_secs)),
        )
        .await
    }

    pub async fn is_delivered(&self, fingerprint: &str, chat_id: &str) -> Result<bool, StoreError> {
        self.store.exists(&delivered_key(fingerprint, chat_id)).await
    }

    pub async fn mark_delivered(
        &self,
        fingerprint: &str,
        chat_id: &str,
        marker: &DeliveryMarker,
    ) -> Result<(), StoreError> {
        set_json(
            self.store.as_ref(),
            &delivered_key(fingerprint, chat_id),
            marker,
            Some(Duration::from_secs(self.ttl.delivered_secs)),
        )
        .await
    }

    /// Missing state reads as a closed breaker with zero failures.
    pub async fn circuit_state(&self, source: &str) -> Result<CircuitState, StoreError> {
        Ok(get_json(self.store.as_ref(), &circuit_key(source))
            .await?
            .unwrap_or_default())
    }

    pub async fn set_circuit_state(
        &self,
        source: &str,
        state: &CircuitState,
    ) -> Result<(), StoreError> {
        set_json(
            self.store.as_ref(),
            &circuit_key(source),
            state,
            Some(Duration::from_secs(self.ttl.circuit_breaker_secs)),
        )
        .await
    }

    pub async fn clear_circuit(&self, source: &str) -> Result<(), StoreError> {
        self.store.delete(&circuit_key(source)).await
    }

    pub async fn record_health(&self, record: &HealthRecord) -> Result<(), StoreError> {
        set_json(self.store.as_ref(), HEALTH_KEY, record, None).await
    }

    pub async fn health(&self) -> Result<Option<HealthRecord>, StoreError> {
        get_json(self.store.as_ref(), HEALTH_KEY).await
    }
}
