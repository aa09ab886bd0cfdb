//! Broadcast dispatcher: fans selected articles out to subscribers.
//!
//! Sends are serialized with a fixed pause after each recipient. Delivery
//! markers make a re-run of the same cycle skip recipients already served.
//! Subscriber changes are returned as `SubscriberUpdate`s for the caller to
//! apply; nothing here writes to the registry.

pub mod format;
pub mod quiet_hours;
pub mod telegram;
pub mod transport;

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::article::Article;
use crate::config::DispatchConfig;
use crate::store::{DeliveryMarker, Ledger, StoreError};
use crate::subscribers::{Subscriber, SubscriberStatus, SubscriberUpdate};

pub use quiet_hours::{QuietHoursPolicy, WindowPolicy};
pub use telegram::TelegramTransport;
pub use transport::{LogTransport, MessageTransport, SendError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastMetrics {
    pub sent: usize,
    pub skipped_duplicate: usize,
    pub failed: usize,
    pub quiet_hours_skipped: usize,
    /// Sends skipped because the recipient turned out blocked or gone earlier this cycle.
    pub skipped_unreachable: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchOutcome {
    pub metrics: BroadcastMetrics,
    pub updates: Vec<SubscriberUpdate>,
}

/// A ledger failure that stopped dispatch part way. `partial` holds what
/// was sent and learned before the failure.
#[derive(Debug, thiserror::Error)]
#[error("dispatch interrupted: {source}")]
pub struct DispatchError {
    #[source]
    pub source: StoreError,
    pub partial: DispatchOutcome,
}

pub struct Dispatcher {
    transport: Arc<dyn MessageTransport>,
    policy: Arc<dyn QuietHoursPolicy>,
    ledger: Ledger,
    config: DispatchConfig,
    offset: FixedOffset,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        policy: Arc<dyn QuietHoursPolicy>,
        ledger: Ledger,
        config: DispatchConfig,
        offset: FixedOffset,
    ) -> Self {
        Self {
            transport,
            policy,
            ledger,
            config,
            offset,
        }
    }

    /// Send with the configured retry budget. Permanent errors return at once.
    async fn send_with_retry(&self, chat_id: &str, text: &str) -> Result<(), SendError> {
        let mut retries = 0u32;
        loop {
            match self.transport.send_message(chat_id, text).await {
                Ok(()) => return Ok(()),
                Err(SendError::Transient(msg)) if retries < self.config.retry_budget => {
                    retries += 1;
                    tracing::warn!(target: "broadcast", chat_id, attempt = retries, error = %msg, "send failed, retrying");
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Deliver `articles` (in send order) to the matching active `subscribers`.
    /// Only ledger errors fail the call.
    pub async fn dispatch(
        &self,
        articles: &[Article],
        subscribers: &[Subscriber],
        now: DateTime<Utc>,
        cycle_id: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        let mut out = DispatchOutcome::default();
        if let Err(source) = self
            .dispatch_into(&mut out, articles, subscribers, now, cycle_id)
            .await
        {
            tracing::error!(target: "broadcast", execution_id = cycle_id, sent = out.metrics.sent, updates = out.updates.len(), error = %source, "broadcast interrupted");
            return Err(DispatchError {
                source,
                partial: out,
            });
        }

        let metrics = &out.metrics;
        tracing::info!(
            target: "broadcast",
            execution_id = cycle_id,
            sent = metrics.sent,
            skipped_duplicate = metrics.skipped_duplicate,
            failed = metrics.failed,
            quiet_hours_skipped = metrics.quiet_hours_skipped,
            skipped_unreachable = metrics.skipped_unreachable,
            "broadcast complete"
        );
        Ok(out)
    }

    async fn dispatch_into(
        &self,
        out: &mut DispatchOutcome,
        articles: &[Article],
        subscribers: &[Subscriber],
        now: DateTime<Utc>,
        cycle_id: &str,
    ) -> Result<(), StoreError> {
        let DispatchOutcome { metrics, updates } = out;
        let mut unreachable: HashSet<&str> = HashSet::new();

        let hour = now.with_timezone(&self.offset).hour();
        let quiet = self.policy.is_quiet(hour);

        for article in articles {
            if !self.policy.allows(article, hour) {
                tracing::info!(target: "broadcast", execution_id = cycle_id, fingerprint = %article.fingerprint, hour, "held back by quiet hours");
                metrics.quiet_hours_skipped += 1;
                continue;
            }

            let text = format::format_message(article, self.offset, quiet);
            let recipients = subscribers
                .iter()
                .filter(|s| s.is_active() && s.wants(article.impact_category));

            for sub in recipients {
                let chat_id = sub.identifier.as_str();
                if unreachable.contains(chat_id) {
                    metrics.skipped_unreachable += 1;
                    continue;
                }
                if self.ledger.is_delivered(&article.fingerprint, chat_id).await? {
                    metrics.skipped_duplicate += 1;
                    continue;
                }

                match self.send_with_retry(chat_id, &text).await {
                    Ok(()) => {
                        let marker = DeliveryMarker {
                            sent_timestamp: now,
                            execution_id: cycle_id.to_string(),
                        };
                        self.ledger
                            .mark_delivered(&article.fingerprint, chat_id, &marker)
                            .await?;
                        metrics.sent += 1;
                        updates.push(SubscriberUpdate::DeliverySuccess {
                            subscriber_type: sub.subscriber_type,
                            identifier: sub.identifier.clone(),
                            at: now,
                        });
                    }
                    Err(e) if e.is_permanent() => {
                        let status = match e {
                            SendError::Blocked => SubscriberStatus::Blocked,
                            _ => SubscriberStatus::Inactive,
                        };
                        tracing::info!(target: "broadcast", execution_id = cycle_id, chat_id, status = %status, "recipient unreachable");
                        metrics.failed += 1;
                        unreachable.insert(chat_id);
                        updates.push(SubscriberUpdate::StatusChange {
                            subscriber_type: sub.subscriber_type,
                            identifier: sub.identifier.clone(),
                            status,
                        });
                        updates.push(SubscriberUpdate::DeliveryFailure {
                            subscriber_type: sub.subscriber_type,
                            identifier: sub.identifier.clone(),
                            at: now,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(target: "broadcast", execution_id = cycle_id, chat_id, error = %e, "send failed after retries");
                        metrics.failed += 1;
                        updates.push(SubscriberUpdate::DeliveryFailure {
                            subscriber_type: sub.subscriber_type,
                            identifier: sub.identifier.clone(),
                            at: now,
                        });
                    }
                }

                tokio::time::sleep(self.config.send_delay()).await;
            }
        }
        Ok(())
    }
}
