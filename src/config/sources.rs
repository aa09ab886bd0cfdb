// src/config/sources.rs
//! Feed source list: name, URL, tier, fetch timeout and trust weight.
//!
//! Loaded from TOML (`[[sources]]` tables) or a JSON array. When nothing is
//! configured the built-in `default_seed()` is used.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::article::SourceTier;

const ENV_PATH: &str = "SOURCES_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    pub tier: SourceTier,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_weight() -> f64 {
    1.0
}

impl SourceConfig {
    pub fn new(name: &str, url: &str, tier: SourceTier, timeout_ms: u64, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            tier,
            timeout_ms,
            weight,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Host part of the feed URL, falling back to the raw URL when unparsable.
    pub fn domain(&self) -> String {
        reqwest::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.url.trim().to_ascii_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub sources: Vec<SourceConfig>,
}

impl SourcesConfig {
    /// Sources of one tier, in configured order.
    pub fn tier(&self, tier: SourceTier) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(move |s| s.tier == tier)
    }

    /// Built-in seed: three Indonesian market/economy feeds per tier.
    pub fn default_seed() -> Self {
        use SourceTier::*;
        let sources = vec![
            SourceConfig::new("CNBC Market", "https://www.cnbcindonesia.com/market/rss", Core, 8_000, 1.2),
            SourceConfig::new("Bloomberg Technoz", "https://www.bloombergtechnoz.com/rss", Core, 8_000, 1.2),
            SourceConfig::new("Antara Ekonomi", "https://www.antaranews.com/rss/ekonomi.xml", Core, 8_000, 1.2),
            SourceConfig::new("Tempo Bisnis", "https://rss.tempo.co/bisnis", Support, 5_000, 1.0),
            SourceConfig::new("CNN Ekonomi", "https://www.cnnindonesia.com/ekonomi/rss", Support, 5_000, 1.0),
            SourceConfig::new("Investing.com", "https://id.investing.com/rss/news.rss", Support, 5_000, 1.0),
            SourceConfig::new("Detik Finance", "https://finance.detik.com/rss", Noise, 5_000, 0.6),
            SourceConfig::new("Liputan6 Saham", "https://feed.liputan6.com/rss/saham", Noise, 5_000, 0.6),
            SourceConfig::new("Republika Ekonomi", "https://www.republika.co.id/rss/ekonomi/", Noise, 5_000, 0.6),
        ];
        Self { sources }
    }
}

/// Load sources from an explicit path. Supports TOML or JSON formats.
pub fn load_sources_from(path: &Path) -> Result<SourcesConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_sources(&content, ext.as_str())
}

/// Load sources using env var + fallbacks:
/// 1) $SOURCES_CONFIG_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
/// 4) built-in seed
pub fn load_sources_default() -> Result<SourcesConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        } else {
            return Err(anyhow!("SOURCES_CONFIG_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_sources_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sources.json");
    if json_p.exists() {
        return load_sources_from(&json_p);
    }
    Ok(SourcesConfig::default_seed())
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<SourcesConfig> {
    let try_toml = hint_ext == "toml" || s.contains("[[sources]]");
    if try_toml {
        if let Ok(v) = toml::from_str::<SourcesConfig>(s) {
            return Ok(clean_list(v.sources));
        }
    }
    if let Ok(v) = serde_json::from_str::<Vec<SourceConfig>>(s) {
        return Ok(clean_list(v));
    }
    if let Ok(v) = serde_json::from_str::<SourcesConfig>(s) {
        return Ok(clean_list(v.sources));
    }
    if !try_toml {
        if let Ok(v) = toml::from_str::<SourcesConfig>(s) {
            return Ok(clean_list(v.sources));
        }
    }
    Err(anyhow!("unsupported sources format"))
}

/// Trim names/URLs, drop entries without a URL, keep the first of duplicate URLs.
fn clean_list(items: Vec<SourceConfig>) -> SourcesConfig {
    let mut seen = HashSet::new();
    let mut sources = Vec::with_capacity(items.len());
    for mut it in items {
        it.name = it.name.trim().to_string();
        it.url = it.url.trim().to_string();
        if it.url.is_empty() || !seen.insert(it.url.to_ascii_lowercase()) {
            continue;
        }
        if it.name.is_empty() {
            it.name = it.domain();
        }
        if !it.weight.is_finite() || it.weight < 0.0 {
            it.weight = default_weight();
        }
        sources.push(it);
    }
    SourcesConfig { sources }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_has_three_per_tier() {
        let seed = SourcesConfig::default_seed();
        for tier in SourceTier::ALL {
            assert_eq!(seed.tier(tier).count(), 3, "tier {tier}");
        }
    }

    #[test]
    fn domain_is_host_of_url() {
        let s = SourceConfig::new("x", "https://finance.detik.com/rss", SourceTier::Noise, 1, 1.0);
        assert_eq!(s.domain(), "finance.detik.com");
    }

    #[test]
    fn toml_and_json_formats_work_and_dedup_by_url() {
        let toml = r#"
[[sources]]
name = " Feed A "
url = "https://a.example/rss"
tier = "CORE"
weight = 1.2

[[sources]]
name = "Feed A again"
url = "https://A.example/rss"
tier = "NOISE"
"#;
        let out = parse_sources(toml, "toml").unwrap();
        assert_eq!(out.sources.len(), 1);
        assert_eq!(out.sources[0].name, "Feed A");
        assert_eq!(out.sources[0].timeout_ms, 5_000);

        let json = r#"[{"name":"","url":"https://b.example/feed","tier":"SUPPORT"}]"#;
        let out = parse_sources(json, "json").unwrap();
        assert_eq!(out.sources[0].name, "b.example");
        assert!((out.sources[0].weight - 1.0).abs() < 1e-9);
    }
}
