// src/store/memory.rs
//! In-process store with TTL support. Used by the dry-run binary and tests.
//!
//! Expiry uses `tokio::time::Instant`, so tests running on a paused clock can
//! move past a TTL with `tokio::time::advance`.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use super::{KvStore, StoreError};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, Entry>,
    sets: HashMap<String, BTreeSet<String>>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Number of live (non-expired) keys, excluding sets.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .map(|g| g.values.values().filter(|e| is_live(e, now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .inner
            .lock()
            .map(|g| {
                g.values
                    .iter()
                    .filter(|(k, e)| k.starts_with(prefix) && is_live(e, now))
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn guard(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked down".into()));
        }
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

fn is_live(e: &Entry, now: Instant) -> bool {
    e.expires_at.is_none_or(|t| t > now)
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut g = self.guard()?;
        let now = Instant::now();
        let expired = match g.values.get(key) {
            None => return Ok(None),
            Some(e) if is_live(e, now) => return Ok(Some(e.value.clone())),
            Some(_) => true,
        };
        if expired {
            g.values.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut g = self.guard()?;
        g.values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut g = self.guard()?;
        g.values.remove(key);
        g.sets.remove(key);
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut g = self.guard()?;
        g.sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut g = self.guard()?;
        if let Some(set) = g.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let g = self.guard()?;
        Ok(g
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_ttl() {
        let s = MemoryStore::new();
        s.set("k", "v", Some(Duration::from_secs(60))).await.unwrap();
        s.set("forever", "v", None).await.unwrap();
        assert!(s.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!s.exists("k").await.unwrap());
        assert!(s.exists("forever").await.unwrap());
        assert_eq!(s.len(), 1);
    }

    #[tokio::test]
    async fn sets_are_ordered_and_idempotent() {
        let s = MemoryStore::new();
        s.set_add("ids", "b").await.unwrap();
        s.set_add("ids", "a").await.unwrap();
        s.set_add("ids", "a").await.unwrap();
        assert_eq!(s.set_members("ids").await.unwrap(), vec!["a", "b"]);
        s.set_remove("ids", "a").await.unwrap();
        assert_eq!(s.set_members("ids").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let s = MemoryStore::new();
        s.set_unavailable(true);
        assert!(matches!(
            s.get("k").await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
