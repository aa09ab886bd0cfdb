// src/broadcast/transport.rs
use async_trait::async_trait;

/// Outcome classes the dispatcher branches on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The recipient blocked the bot. Permanent.
    #[error("recipient blocked the bot")]
    Blocked,
    /// The chat no longer exists. Permanent.
    #[error("chat not found")]
    ChatNotFound,
    /// Anything else (network, rate limit, server error). Retryable.
    #[error("transient send failure: {0}")]
    Transient(String),
}

impl SendError {
    /// Map a provider error description onto a class.
    pub fn classify(description: &str) -> Self {
        let d = description.to_ascii_lowercase();
        if d.contains("bot was blocked") || d.contains("user is deactivated") {
            SendError::Blocked
        } else if d.contains("chat not found") {
            SendError::ChatNotFound
        } else {
            SendError::Transient(description.to_string())
        }
    }

    pub fn is_permanent(&self) -> bool {
        !matches!(self, SendError::Transient(_))
    }
}

#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), SendError>;
}

/// Dry-run transport: logs every message and always succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl MessageTransport for LogTransport {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), SendError> {
        tracing::info!(target: "broadcast", chat_id, chars = text.chars().count(), "dry-run send\n{text}");
        Ok(())
    }
}
