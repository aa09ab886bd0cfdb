//! Telegram webhook updates: contact registration and chat commands.

use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;

use crate::article::ImpactCategory;
use crate::store::StoreError;
use crate::subscribers::{Preferences, SubscriberKind, SubscriberRegistry, SubscriberStatus};

const ADMIN_LIST_LIMIT: usize = 20;

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub chat_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Subscribe,
    Unsubscribe,
    Status,
    Filter(Vec<String>),
    Help,
    AdminStats,
    AdminSubscribers,
    AdminUsage,
    Unknown(String),
}

/// Parse `/cmd[@bot] args…`. Plain text is not a command.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let head = parts.next()?;
    let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
    let args: Vec<String> = parts.map(str::to_string).collect();

    let cmd = match name.as_str() {
        "start" => Command::Start,
        "subscribe" => Command::Subscribe,
        "unsubscribe" => Command::Unsubscribe,
        "status" => Command::Status,
        "filter" => Command::Filter(args),
        "help" => Command::Help,
        "admin" => match args.first().map(|a| a.to_ascii_lowercase()).as_deref() {
            Some("stats") => Command::AdminStats,
            Some("subscribers") => Command::AdminSubscribers,
            _ => Command::AdminUsage,
        },
        other => Command::Unknown(other.to_string()),
    };
    Some(cmd)
}

/// Reply to send back into the originating chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub chat_id: String,
    pub text: String,
}

#[derive(Clone)]
pub struct BotHandler {
    registry: SubscriberRegistry,
    admin_user_ids: Vec<String>,
    offset: FixedOffset,
}

impl BotHandler {
    pub fn new(registry: SubscriberRegistry, admin_user_ids: Vec<String>, offset: FixedOffset) -> Self {
        Self {
            registry,
            admin_user_ids,
            offset,
        }
    }

    fn is_admin(&self, user: Option<&User>) -> bool {
        user.is_some_and(|u| {
            let id = u.id.to_string();
            self.admin_user_ids.iter().any(|a| *a == id)
        })
    }

    /// Register the chat and answer its command, if any. Channels and
    /// updates without a message are ignored.
    pub async fn handle_update(
        &self,
        update: &Update,
        now: DateTime<Utc>,
    ) -> Result<Option<Reply>, StoreError> {
        let Some(msg) = &update.message else {
            return Ok(None);
        };
        let Some(kind) = SubscriberKind::from_chat_type(&msg.chat.chat_type) else {
            tracing::debug!(target: "bot", chat_type = %msg.chat.chat_type, "ignoring update");
            return Ok(None);
        };
        let chat_id = msg.chat.id.to_string();
        self.registry.register_contact(kind, &chat_id, now).await?;

        let Some(cmd) = msg.text.as_deref().and_then(parse_command) else {
            return Ok(None);
        };
        tracing::info!(target: "bot", chat_id = %chat_id, kind = %kind, command = ?cmd, "command");

        let text = match cmd {
            Command::Start => start_text(),
            Command::Help => help_text(),
            Command::Subscribe => {
                self.registry.subscribe(kind, &chat_id, now).await?;
                match kind {
                    SubscriberKind::User => format!(
                        "✅ *Berhasil berlangganan!*\n\nAnda akan menerima notifikasi berita market secara otomatis.\n\nID Anda: `{chat_id}`\n\nGunakan /unsubscribe untuk berhenti."
                    ),
                    SubscriberKind::Group => format!(
                        "✅ *Grup ini berhasil berlangganan!*\n\nGrup ID: `{chat_id}`\n\nGunakan /unsubscribe untuk berhenti."
                    ),
                }
            }
            Command::Unsubscribe => {
                self.registry.unsubscribe(kind, &chat_id, now).await?;
                "✅ *Berhenti berlangganan.*\n\nAnda tidak akan lagi menerima notifikasi otomatis.\n\nGunakan /subscribe untuk mendaftar kembali.".to_string()
            }
            Command::Status => match self.registry.get(kind, &chat_id).await? {
                None => "❌ Anda belum terdaftar. Gunakan /subscribe untuk mendaftar.".to_string(),
                Some(sub) => {
                    let emoji = if sub.is_active() { "✅" } else { "❌" };
                    format!(
                        "📊 *Status Subscription*\n\n{emoji} Status: {status}\n📅 Terdaftar: {created}\n🔔 Filter: {filter}",
                        status = sub.status.as_str().to_ascii_uppercase(),
                        created = sub.created_at.with_timezone(&self.offset).format("%d/%m/%Y"),
                        filter = filter_label(&sub.preferences.impact_filter),
                    )
                }
            },
            Command::Filter(args) => self.filter(kind, &chat_id, &args, now).await?,
            Command::AdminStats | Command::AdminSubscribers | Command::AdminUsage
                if !self.is_admin(msg.from.as_ref()) =>
            {
                "❌ Akses ditolak. Admin only.".to_string()
            }
            Command::AdminStats => {
                let s = self.registry.stats().await?;
                format!(
                    "📊 *Statistik Sistem*\n\n👥 Total Subscriber: {}\n• Individual: {}\n• Grup: {}\n\n✅ Aktif: {}\n❌ Blocked: {}\n⏸️ Inactive: {}",
                    s.total,
                    s.users.total,
                    s.groups.total,
                    s.users.active + s.groups.active,
                    s.users.blocked + s.groups.blocked,
                    s.users.inactive + s.groups.inactive,
                )
            }
            Command::AdminSubscribers => {
                let all = self.registry.all().await?;
                if all.is_empty() {
                    "📭 Belum ada subscriber.".to_string()
                } else {
                    let list: Vec<String> = all
                        .iter()
                        .take(ADMIN_LIST_LIMIT)
                        .enumerate()
                        .map(|(i, s)| {
                            format!("{}. `{}` | {} | {}", i + 1, s.identifier, s.subscriber_type, s.status)
                        })
                        .collect();
                    format!(
                        "📋 *Subscriber List* ({}/{})\n\n{}",
                        list.len(),
                        all.len(),
                        list.join("\n")
                    )
                }
            }
            Command::AdminUsage => "Gunakan /admin stats atau /admin subscribers.".to_string(),
            Command::Unknown(_) => "Perintah tidak dikenal. Gunakan /help.".to_string(),
        };

        Ok(Some(Reply { chat_id, text }))
    }

    async fn filter(
        &self,
        kind: SubscriberKind,
        chat_id: &str,
        args: &[String],
        now: DateTime<Utc>,
    ) -> Result<String, StoreError> {
        let wanted: Option<BTreeSet<ImpactCategory>> =
            args.iter().map(|a| ImpactCategory::parse(a)).collect();
        let Some(impact_filter) = wanted.filter(|w| !w.is_empty()) else {
            return Ok("Format: /filter high med low (pilih satu atau lebih).".to_string());
        };
        let label = filter_label(&impact_filter);
        match self
            .registry
            .set_preferences(kind, chat_id, Preferences { impact_filter }, now)
            .await?
        {
            Some(sub) if sub.status == SubscriberStatus::Active => {
                Ok(format!("🔔 Filter diperbarui: {label}"))
            }
            Some(_) => Ok(format!(
                "🔔 Filter diperbarui: {label}\n\nGunakan /subscribe untuk mulai menerima notifikasi."
            )),
            None => Ok("❌ Anda belum terdaftar. Gunakan /subscribe untuk mendaftar.".to_string()),
        }
    }
}

fn filter_label(filter: &BTreeSet<ImpactCategory>) -> String {
    filter
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn start_text() -> String {
    "👋 *Selamat datang di Bot Berita Market!*\n\nBot ini mengirimkan berita terkini terkait sentimen pasar saham, ekonomi, dan finansial Indonesia.\n\n🔔 *Cara Pakai:*\n/subscribe - Daftar notifikasi otomatis\n/unsubscribe - Berhenti berlangganan\n/status - Cek status subscription\n/filter - Atur kategori berita\n/help - Daftar perintah\n\n⚠️ *Disclaimer:* Berita ini untuk informasi, bukan rekomendasi investasi.".to_string()
}

fn help_text() -> String {
    "📚 *Daftar Perintah*\n\n*Public Commands:*\n/start - Sambutan dan instruksi\n/subscribe - Daftar notifikasi otomatis\n/unsubscribe - Berhenti berlangganan\n/status - Cek status subscription\n/filter high med low - Pilih kategori berita\n/help - Tampilkan bantuan ini\n\n*Admin Commands:*\n/admin stats - Lihat statistik sistem\n/admin subscribers - List subscriber".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn handler() -> BotHandler {
        let registry = SubscriberRegistry::new(Arc::new(MemoryStore::new()));
        BotHandler::new(
            registry,
            vec!["42".to_string()],
            FixedOffset::east_opt(7 * 3600).unwrap(),
        )
    }

    fn update(chat_id: i64, chat_type: &str, from: i64, text: &str) -> Update {
        serde_json::from_value(serde_json::json!({
            "update_id": 1,
            "message": {
                "chat": { "id": chat_id, "type": chat_type },
                "from": { "id": from },
                "text": text
            }
        }))
        .unwrap()
    }

    #[test]
    fn parses_commands_with_bot_suffix() {
        assert_eq!(parse_command("/start@market_bot"), Some(Command::Start));
        assert_eq!(
            parse_command("/filter HIGH low"),
            Some(Command::Filter(vec!["HIGH".into(), "low".into()]))
        );
        assert_eq!(parse_command("/admin stats"), Some(Command::AdminStats));
        assert_eq!(parse_command("/admin"), Some(Command::AdminUsage));
        assert_eq!(parse_command("halo"), None);
    }

    #[tokio::test]
    async fn any_message_registers_contact() {
        let h = handler();
        let now = Utc::now();
        let r = h.handle_update(&update(7, "private", 7, "halo"), now).await.unwrap();
        assert!(r.is_none());
        let sub = h.registry.get(SubscriberKind::User, "7").await.unwrap().unwrap();
        assert!(sub.is_active());
    }

    #[tokio::test]
    async fn unsubscribe_then_filter_then_subscribe() {
        let h = handler();
        let now = Utc::now();
        h.handle_update(&update(-100, "supergroup", 1, "/unsubscribe"), now)
            .await
            .unwrap();
        let g = h.registry.get(SubscriberKind::Group, "-100").await.unwrap().unwrap();
        assert_eq!(g.status, SubscriberStatus::Inactive);

        let r = h
            .handle_update(&update(-100, "supergroup", 1, "/filter high"), now)
            .await
            .unwrap()
            .unwrap();
        assert!(r.text.contains("HIGH"));

        h.handle_update(&update(-100, "supergroup", 1, "/subscribe"), now)
            .await
            .unwrap();
        let g = h.registry.get(SubscriberKind::Group, "-100").await.unwrap().unwrap();
        assert!(g.is_active());
        assert!(g.wants(ImpactCategory::High));
        assert!(!g.wants(ImpactCategory::Med));
    }

    #[tokio::test]
    async fn bad_filter_is_rejected() {
        let h = handler();
        let r = h
            .handle_update(&update(7, "private", 7, "/filter urgent"), Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(r.text.starts_with("Format:"));
    }

    #[tokio::test]
    async fn admin_commands_check_sender() {
        let h = handler();
        let now = Utc::now();
        let denied = h
            .handle_update(&update(7, "private", 7, "/admin stats"), now)
            .await
            .unwrap()
            .unwrap();
        assert!(denied.text.contains("Akses ditolak"));

        let ok = h
            .handle_update(&update(42, "private", 42, "/admin stats"), now)
            .await
            .unwrap()
            .unwrap();
        assert!(ok.text.contains("Total Subscriber: 2"));
    }

    #[tokio::test]
    async fn channel_posts_are_ignored() {
        let h = handler();
        let r = h
            .handle_update(&update(-5, "channel", 1, "/start"), Utc::now())
            .await
            .unwrap();
        assert!(r.is_none());
        assert_eq!(h.registry.stats().await.unwrap().total, 0);
    }
}
