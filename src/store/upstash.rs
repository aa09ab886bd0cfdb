// src/store/upstash.rs
//! Redis over the Upstash REST API.
//!
//! Each call POSTs a command array (`["SET", key, value, "EX", 60]`) to the
//! base URL with a bearer token and reads back `{"result": ...}` or
//! `{"error": "..."}`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{KvStore, StoreError};

#[derive(Clone)]
pub struct UpstashStore {
    base_url: String,
    token: String,
    client: Client,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct RestReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl UpstashStore {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client: Client::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    async fn command(&self, args: Value) -> Result<Value, StoreError> {
        let rsp = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .json(&args)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("upstash request failed: {e}")))?;

        let status = rsp.status();
        let reply: RestReply = rsp
            .json()
            .await
            .map_err(|e| StoreError::Backend(format!("upstash reply unreadable ({status}): {e}")))?;

        if let Some(err) = reply.error {
            return Err(StoreError::Backend(err));
        }
        if !status.is_success() {
            return Err(StoreError::Backend(format!("upstash HTTP {status}")));
        }
        Ok(reply.result)
    }
}

#[async_trait]
impl KvStore for UpstashStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let v = self.command(json!(["EXISTS", key])).await?;
        Ok(v.as_i64().unwrap_or(0) > 0)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.command(json!(["GET", key])).await? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Ok(Some(other.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let args = match ttl {
            Some(d) => json!(["SET", key, value, "EX", d.as_secs().max(1)]),
            None => json!(["SET", key, value]),
        };
        self.command(args).await.map(|_| ())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.command(json!(["DEL", key])).await.map(|_| ())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.command(json!(["SADD", key, member])).await.map(|_| ())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.command(json!(["SREM", key, member])).await.map(|_| ())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let v = self.command(json!(["SMEMBERS", key])).await?;
        let mut members: Vec<String> = v
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|m| m.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }
}
