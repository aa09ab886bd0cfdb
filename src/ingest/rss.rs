// src/ingest/rss.rs
//! RSS 2.0 provider. Fetches over HTTP or parses an in-memory fixture.

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use reqwest::Client;
use serde::Deserialize;

use crate::config::SourceConfig;
use crate::ingest::normalize::clean_text;
use crate::ingest::types::{RawArticle, SourceProvider};

pub const USER_AGENT: &str = "Market News Bot/1.0";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "content:encoded")]
    content: Option<String>,
    #[serde(rename = "media:description")]
    media_description: Option<String>,
}

/// Shared HTTP client for feed fetching.
pub fn http_client() -> reqwest::Result<Client> {
    Client::builder().user_agent(USER_AGENT).build()
}

pub struct RssProvider {
    source: SourceConfig,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http(Client),
}

impl RssProvider {
    pub fn http(source: SourceConfig, client: Client) -> Self {
        Self {
            source,
            mode: Mode::Http(client),
        }
    }

    pub fn from_fixture_str(source: SourceConfig, xml: &str) -> Self {
        Self {
            source,
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn parse_items_from_str(s: &str) -> Result<Vec<RawArticle>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let title = clean_text(it.title.as_deref().unwrap_or_default());
            if title.is_empty() {
                continue;
            }
            let description = [it.content, it.description, it.media_description]
                .into_iter()
                .flatten()
                .map(|d| clean_text(&d))
                .find(|d| !d.is_empty());
            let link = it
                .link
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty());

            out.push(RawArticle {
                title,
                link,
                pub_date: it.pub_date.map(|d| d.trim().to_string()),
                description,
            });
        }

        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("ingest_items_total").increment(out.len() as u64);
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for RssProvider {
    fn source(&self) -> &SourceConfig {
        &self.source
    }

    async fn fetch_latest(&self) -> Result<Vec<RawArticle>> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_items_from_str(s),
            Mode::Http(client) => {
                let body = client
                    .get(&self.source.url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .with_context(|| format!("GET {}", self.source.url))?
                    .text()
                    .await
                    .with_context(|| format!("reading body of {}", self.source.url))?;
                Self::parse_items_from_str(&body)
            }
        }
    }
}

/// Named HTML entities are not valid XML; map the common ones before parsing.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
