// src/broadcast/telegram.rs
//! Telegram Bot API `sendMessage` transport.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::transport::{MessageTransport, SendError};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Clone)]
pub struct TelegramTransport {
    token: String,
    api_base: String,
    client: Client,
    timeout: Duration,
}

#[derive(Serialize)]
struct SendMessagePayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramTransport {
    pub fn new(token: String) -> Self {
        Self {
            token,
            api_base: DEFAULT_API_BASE.to_string(),
            client: Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }
}

#[async_trait]
impl MessageTransport for TelegramTransport {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), SendError> {
        let payload = SendMessagePayload {
            chat_id,
            text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };

        let rsp = self
            .client
            .post(self.method_url("sendMessage"))
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            // Strip the URL: it carries the bot token.
            .map_err(|e| SendError::Transient(format!("telegram request failed: {}", e.without_url())))?;

        let status = rsp.status();
        match rsp.json::<ApiReply>().await {
            Ok(reply) if reply.ok => Ok(()),
            Ok(reply) => Err(SendError::classify(
                reply
                    .description
                    .as_deref()
                    .unwrap_or("telegram returned ok=false"),
            )),
            Err(_) => Err(SendError::Transient(format!("telegram HTTP {status}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_url_uses_trimmed_base() {
        let t = TelegramTransport::new("123:abc".into()).with_api_base("http://localhost:8081/");
        assert_eq!(t.method_url("sendMessage"), "http://localhost:8081/bot123:abc/sendMessage");
    }

    #[test]
    fn payload_disables_previews() {
        let p = SendMessagePayload {
            chat_id: "-100",
            text: "hi",
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["parse_mode"], "Markdown");
        assert_eq!(v["disable_web_page_preview"], true);
    }
}
