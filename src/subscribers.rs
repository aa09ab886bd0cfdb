//! Subscriber registry.
//!
//! Records live at `subscriber:{type}:{id}`. Two index sets per type:
//! `subscribers:all:{type}s` (everyone ever seen) and
//! `subscribers:active:{type}s` (active only). Records are never deleted;
//! status is the lifecycle.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::article::ImpactCategory;
use crate::store::{get_json, set_json, KvStore, StoreError};

const STATS_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberKind {
    User,
    Group,
}

impl SubscriberKind {
    pub const ALL: [SubscriberKind; 2] = [SubscriberKind::User, SubscriberKind::Group];

    pub fn as_str(self) -> &'static str {
        match self {
            SubscriberKind::User => "user",
            SubscriberKind::Group => "group",
        }
    }

    /// Telegram chat type: `private` → user, `group`/`supergroup` → group.
    pub fn from_chat_type(chat_type: &str) -> Option<Self> {
        match chat_type {
            "private" => Some(SubscriberKind::User),
            "group" | "supergroup" => Some(SubscriberKind::Group),
            _ => None,
        }
    }

    /// Positive chat ids are users, negative ones groups.
    pub fn from_chat_id(chat_id: i64) -> Self {
        if chat_id > 0 {
            SubscriberKind::User
        } else {
            SubscriberKind::Group
        }
    }
}

impl fmt::Display for SubscriberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberStatus {
    Active,
    Inactive,
    Blocked,
}

impl SubscriberStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriberStatus::Active => "active",
            SubscriberStatus::Inactive => "inactive",
            SubscriberStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for SubscriberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_impact_filter")]
    pub impact_filter: BTreeSet<ImpactCategory>,
}

fn default_impact_filter() -> BTreeSet<ImpactCategory> {
    [ImpactCategory::High, ImpactCategory::Med].into_iter().collect()
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            impact_filter: default_impact_filter(),
        }
    }
}

/// Delivery counters over a rolling 7-day window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryStats {
    pub last_success: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub success_count_7d: u32,
    pub fail_count_7d: u32,
    pub window_start: Option<DateTime<Utc>>,
}

impl DeliveryStats {
    fn roll(&mut self, now: DateTime<Utc>) {
        let expired = self
            .window_start
            .is_none_or(|start| now - start >= ChronoDuration::days(STATS_WINDOW_DAYS));
        if expired {
            self.success_count_7d = 0;
            self.fail_count_7d = 0;
            self.window_start = Some(now);
        }
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.roll(now);
        self.success_count_7d += 1;
        self.last_success = Some(now);
        self.last_attempt = Some(now);
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.roll(now);
        self.fail_count_7d += 1;
        self.last_attempt = Some(now);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub identifier: String,
    pub subscriber_type: SubscriberKind,
    pub status: SubscriberStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub delivery_stats: DeliveryStats,
}

impl Subscriber {
    pub fn new(kind: SubscriberKind, identifier: &str, now: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.to_string(),
            subscriber_type: kind,
            status: SubscriberStatus::Active,
            created_at: now,
            updated_at: now,
            preferences: Preferences::default(),
            delivery_stats: DeliveryStats::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriberStatus::Active
    }

    pub fn wants(&self, category: ImpactCategory) -> bool {
        self.preferences.impact_filter.contains(&category)
    }
}

/// Registry mutation produced by the dispatcher and applied by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubscriberUpdate {
    StatusChange {
        subscriber_type: SubscriberKind,
        identifier: String,
        status: SubscriberStatus,
    },
    DeliverySuccess {
        subscriber_type: SubscriberKind,
        identifier: String,
        at: DateTime<Utc>,
    },
    DeliveryFailure {
        subscriber_type: SubscriberKind,
        identifier: String,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub active: usize,
    pub inactive: usize,
    pub blocked: usize,
    pub total: usize,
}

impl StatusCounts {
    fn add(&mut self, status: SubscriberStatus) {
        match status {
            SubscriberStatus::Active => self.active += 1,
            SubscriberStatus::Inactive => self.inactive += 1,
            SubscriberStatus::Blocked => self.blocked += 1,
        }
        self.total += 1;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub users: StatusCounts,
    pub groups: StatusCounts,
    pub total: usize,
}

pub fn subscriber_key(kind: SubscriberKind, identifier: &str) -> String {
    format!("subscriber:{kind}:{identifier}")
}

fn active_index(kind: SubscriberKind) -> String {
    format!("subscribers:active:{kind}s")
}

fn all_index(kind: SubscriberKind) -> String {
    format!("subscribers:all:{kind}s")
}

#[derive(Clone)]
pub struct SubscriberRegistry {
    store: Arc<dyn KvStore>,
}

impl SubscriberRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get(
        &self,
        kind: SubscriberKind,
        identifier: &str,
    ) -> Result<Option<Subscriber>, StoreError> {
        get_json(self.store.as_ref(), &subscriber_key(kind, identifier)).await
    }

    /// Like `get`, but an undecodable record is logged and treated as absent.
    /// Bulk reads and cycle updates go through this.
    async fn get_lenient(
        &self,
        kind: SubscriberKind,
        identifier: &str,
    ) -> Result<Option<Subscriber>, StoreError> {
        match self.get(kind, identifier).await {
            Err(StoreError::Malformed { key, source }) => {
                tracing::warn!(target: "subscribers", %key, error = %source, "skipping malformed subscriber record");
                Ok(None)
            }
            other => other,
        }
    }

    /// Persist the record and keep both index sets in line with its status.
    async fn save(&self, sub: &Subscriber) -> Result<(), StoreError> {
        let kind = sub.subscriber_type;
        set_json(
            self.store.as_ref(),
            &subscriber_key(kind, &sub.identifier),
            sub,
            None,
        )
        .await?;
        self.store.set_add(&all_index(kind), &sub.identifier).await?;
        if sub.is_active() {
            self.store.set_add(&active_index(kind), &sub.identifier).await
        } else {
            self.store
                .set_remove(&active_index(kind), &sub.identifier)
                .await
        }
    }

    /// First contact creates an active record; existing records are left as they are.
    pub async fn register_contact(
        &self,
        kind: SubscriberKind,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Subscriber, StoreError> {
        if let Some(existing) = self.get(kind, identifier).await? {
            return Ok(existing);
        }
        let sub = Subscriber::new(kind, identifier, now);
        self.save(&sub).await?;
        tracing::info!(target: "subscribers", kind = %kind, chat_id = identifier, "new contact registered");
        Ok(sub)
    }

    /// Create or reactivate, keeping creation time, preferences and stats.
    pub async fn subscribe(
        &self,
        kind: SubscriberKind,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Subscriber, StoreError> {
        let sub = match self.get(kind, identifier).await? {
            Some(mut existing) => {
                existing.status = SubscriberStatus::Active;
                existing.updated_at = now;
                existing
            }
            None => Subscriber::new(kind, identifier, now),
        };
        self.save(&sub).await?;
        Ok(sub)
    }

    pub async fn unsubscribe(
        &self,
        kind: SubscriberKind,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscriber>, StoreError> {
        self.update_status(kind, identifier, SubscriberStatus::Inactive, now)
            .await
    }

    /// `None` when the subscriber does not exist.
    pub async fn update_status(
        &self,
        kind: SubscriberKind,
        identifier: &str,
        status: SubscriberStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscriber>, StoreError> {
        let Some(mut sub) = self.get(kind, identifier).await? else {
            return Ok(None);
        };
        sub.status = status;
        sub.updated_at = now;
        self.save(&sub).await?;
        Ok(Some(sub))
    }

    pub async fn set_preferences(
        &self,
        kind: SubscriberKind,
        identifier: &str,
        preferences: Preferences,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscriber>, StoreError> {
        let Some(mut sub) = self.get(kind, identifier).await? else {
            return Ok(None);
        };
        sub.preferences = preferences;
        sub.updated_at = now;
        self.save(&sub).await?;
        Ok(Some(sub))
    }

    /// Active subscribers of one type (or both), users first, ids sorted.
    pub async fn active(&self, kind: Option<SubscriberKind>) -> Result<Vec<Subscriber>, StoreError> {
        let mut out = Vec::new();
        for k in SubscriberKind::ALL {
            if kind.is_some_and(|want| want != k) {
                continue;
            }
            for id in self.store.set_members(&active_index(k)).await? {
                match self.get_lenient(k, &id).await? {
                    Some(sub) if sub.is_active() => out.push(sub),
                    _ => {}
                }
            }
        }
        Ok(out)
    }

    /// Every known subscriber regardless of status.
    pub async fn all(&self) -> Result<Vec<Subscriber>, StoreError> {
        let mut out = Vec::new();
        for k in SubscriberKind::ALL {
            for id in self.store.set_members(&all_index(k)).await? {
                if let Some(sub) = self.get_lenient(k, &id).await? {
                    out.push(sub);
                }
            }
        }
        Ok(out)
    }

    pub async fn apply_update(
        &self,
        update: &SubscriberUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        match update {
            SubscriberUpdate::StatusChange {
                subscriber_type,
                identifier,
                status,
            } => {
                if let Some(mut sub) = self.get_lenient(*subscriber_type, identifier).await? {
                    sub.status = *status;
                    sub.updated_at = now;
                    self.save(&sub).await?;
                }
            }
            SubscriberUpdate::DeliverySuccess {
                subscriber_type,
                identifier,
                at,
            } => {
                if let Some(mut sub) = self.get_lenient(*subscriber_type, identifier).await? {
                    sub.delivery_stats.record_success(*at);
                    self.save(&sub).await?;
                }
            }
            SubscriberUpdate::DeliveryFailure {
                subscriber_type,
                identifier,
                at,
            } => {
                if let Some(mut sub) = self.get_lenient(*subscriber_type, identifier).await? {
                    sub.delivery_stats.record_failure(*at);
                    self.save(&sub).await?;
                }
            }
        }
        Ok(())
    }

    pub async fn apply_updates(
        &self,
        updates: &[SubscriberUpdate],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        for u in updates {
            self.apply_update(u, now).await?;
        }
        Ok(())
    }

    pub async fn stats(&self) -> Result<RegistryStats, StoreError> {
        let mut stats = RegistryStats::default();
        for sub in self.all().await? {
            match sub.subscriber_type {
                SubscriberKind::User => stats.users.add(sub.status),
                SubscriberKind::Group => stats.groups.add(sub.status),
            }
            stats.total += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> SubscriberRegistry {
        SubscriberRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn chat_kinds() {
        assert_eq!(SubscriberKind::from_chat_type("private"), Some(SubscriberKind::User));
        assert_eq!(SubscriberKind::from_chat_type("supergroup"), Some(SubscriberKind::Group));
        assert_eq!(SubscriberKind::from_chat_type("channel"), None);
        assert_eq!(SubscriberKind::from_chat_id(-100123), SubscriberKind::Group);
    }

    #[tokio::test]
    async fn lifecycle_keeps_history_and_indexes() {
        let reg = registry();
        let t0 = Utc::now();
        let sub = reg.register_contact(SubscriberKind::User, "42", t0).await.unwrap();
        assert!(sub.is_active());
        assert!(sub.wants(ImpactCategory::Med));
        assert!(!sub.wants(ImpactCategory::Low));

        reg.unsubscribe(SubscriberKind::User, "42", t0).await.unwrap();
        assert!(reg.active(None).await.unwrap().is_empty());

        // A plain message must not reactivate.
        let again = reg.register_contact(SubscriberKind::User, "42", t0).await.unwrap();
        assert_eq!(again.status, SubscriberStatus::Inactive);

        let t1 = t0 + ChronoDuration::hours(1);
        let back = reg.subscribe(SubscriberKind::User, "42", t1).await.unwrap();
        assert!(back.is_active());
        assert_eq!(back.created_at, t0);
        assert_eq!(reg.active(Some(SubscriberKind::User)).await.unwrap().len(), 1);
        assert!(reg.active(Some(SubscriberKind::Group)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stats_window_rolls_after_seven_days() {
        let reg = registry();
        let t0 = Utc::now();
        reg.subscribe(SubscriberKind::Group, "-5", t0).await.unwrap();
        let ok = |at| SubscriberUpdate::DeliverySuccess {
            subscriber_type: SubscriberKind::Group,
            identifier: "-5".into(),
            at,
        };
        reg.apply_updates(&[ok(t0), ok(t0)], t0).await.unwrap();
        reg.apply_update(
            &SubscriberUpdate::DeliveryFailure {
                subscriber_type: SubscriberKind::Group,
                identifier: "-5".into(),
                at: t0,
            },
            t0,
        )
        .await
        .unwrap();
        let s = reg.get(SubscriberKind::Group, "-5").await.unwrap().unwrap();
        assert_eq!((s.delivery_stats.success_count_7d, s.delivery_stats.fail_count_7d), (2, 1));

        let later = t0 + ChronoDuration::days(8);
        reg.apply_update(&ok(later), later).await.unwrap();
        let s = reg.get(SubscriberKind::Group, "-5").await.unwrap().unwrap();
        assert_eq!((s.delivery_stats.success_count_7d, s.delivery_stats.fail_count_7d), (1, 0));
        assert_eq!(s.delivery_stats.last_success, Some(later));
    }

    #[tokio::test]
    async fn stats_count_by_type_and_status() {
        let reg = registry();
        let now = Utc::now();
        reg.subscribe(SubscriberKind::User, "1", now).await.unwrap();
        reg.subscribe(SubscriberKind::User, "2", now).await.unwrap();
        reg.subscribe(SubscriberKind::Group, "-3", now).await.unwrap();
        reg.update_status(SubscriberKind::User, "2", SubscriberStatus::Blocked, now)
            .await
            .unwrap();
        let st = reg.stats().await.unwrap();
        assert_eq!(st.users.active, 1);
        assert_eq!(st.users.blocked, 1);
        assert_eq!(st.groups.total, 1);
        assert_eq!(st.total, 3);
        assert!(reg
            .update_status(SubscriberKind::User, "999", SubscriberStatus::Blocked, now)
            .await
            .unwrap()
            .is_none());
    }
}
