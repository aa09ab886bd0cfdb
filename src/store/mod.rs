// src/store/mod.rs
//! Key-value storage used for ledgers, subscribers and circuit-breaker state.
//!
//! The pipeline only needs single-key read/modify/write plus small string
//! sets for subscriber indexes, so the trait mirrors a Redis subset. Values
//! are JSON strings; use `get_json` / `set_json` for typed access.

pub mod ledger;
pub mod memory;
pub mod upstash;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

pub use ledger::{CircuitState, DeliveryMarker, DispatchedMarker, HealthRecord, Ledger};
pub use memory::MemoryStore;
pub use upstash::UpstashStore;

/// Storage failures. Any of these aborts the running cycle.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("malformed value under `{key}`: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// `ttl = None` stores without expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Malformed {
                key: key.to_string(),
                source,
            }),
    }
}

pub async fn set_json<T: Serialize>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Malformed {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &raw, ttl).await
}
