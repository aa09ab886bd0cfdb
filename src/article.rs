//! article.rs — the per-cycle news item and its classification enums.
//!
//! An `Article` is built from a feed item by `ingest::normalize_article`, then
//! enriched by scoring (`scoring::score_article`) and, for the final selected
//! set only, by selection (`send_order`). Nothing here performs I/O.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority rank of a news source. Lower rank = higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceTier {
    Core,
    Support,
    Noise,
}

impl SourceTier {
    /// All tiers in fetch/priority order.
    pub const ALL: [SourceTier; 3] = [SourceTier::Core, SourceTier::Support, SourceTier::Noise];

    /// Numeric rank used by cross-source tie-breaking (1 = CORE).
    pub fn rank(self) -> u8 {
        match self {
            SourceTier::Core => 1,
            SourceTier::Support => 2,
            SourceTier::Noise => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceTier::Core => "CORE",
            SourceTier::Support => "SUPPORT",
            SourceTier::Noise => "NOISE",
        }
    }
}

impl fmt::Display for SourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Market significance of an article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ImpactCategory {
    #[serde(rename = "HIGH", alias = "high")]
    High,
    #[serde(rename = "MED", alias = "med", alias = "MEDIUM")]
    Med,
    #[serde(rename = "LOW", alias = "low")]
    Low,
}

impl ImpactCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ImpactCategory::High => "HIGH",
            ImpactCategory::Med => "MED",
            ImpactCategory::Low => "LOW",
        }
    }

    /// Lenient parse for chat commands and query strings.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Some(ImpactCategory::High),
            "MED" | "MEDIUM" => Some(ImpactCategory::Med),
            "LOW" => Some(ImpactCategory::Low),
            _ => None,
        }
    }
}

impl fmt::Display for ImpactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which keyword tier produced the topic score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TopicLevel {
    Macro,
    Market,
    Sector,
    Issuer,
    #[default]
    General,
}

/// One news item flowing through a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    /// May be empty; the fingerprint then falls back to title/hour/domain.
    pub link: String,
    /// Publish timestamp as found in the feed (unparsed).
    pub raw_pub_date: Option<String>,
    pub description: String,
    pub source: String,
    pub source_tier: SourceTier,
    pub source_weight: f64,
    pub source_domain: String,

    // --- normalization ---
    pub canonical_title: String,
    /// `YYYY-MM-DDTHH` in the configured local offset.
    pub hour_bucket: String,
    pub published_at: DateTime<FixedOffset>,
    /// True when the feed date was missing or unparsable and "now" was used.
    #[serde(default)]
    pub date_fallback: bool,
    /// Isolated 4-letter uppercase tokens (issuer tickers).
    #[serde(default)]
    pub tickers: Vec<String>,
    /// 16 hex chars, see `dedup::fingerprint`.
    pub fingerprint: String,

    // --- scoring ---
    #[serde(default)]
    pub topic_score: u32,
    #[serde(default)]
    pub topic_level: TopicLevel,
    #[serde(default = "one")]
    pub keyword_multiplier: f64,
    #[serde(default = "one")]
    pub scope_multiplier: f64,
    #[serde(default)]
    pub has_extreme_keyword: bool,
    #[serde(default)]
    pub impact_score: i64,
    #[serde(default = "default_category")]
    pub impact_category: ImpactCategory,

    // --- selection ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_order: Option<u32>,
}

fn one() -> f64 {
    1.0
}

fn default_category() -> ImpactCategory {
    ImpactCategory::Low
}

impl Article {
    /// Lowercased `title + " " + description`, the haystack for keyword matching.
    pub fn search_text(&self) -> String {
        format!("{} {}", self.title, self.description).to_lowercase()
    }
}
