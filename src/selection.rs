//! Per-cycle selection: which scored, unique articles go out and in what order.
//!
//! Pure and deterministic. Scores and fingerprints are never touched; only
//! inclusion and `send_order` are decided here.

use serde::Serialize;
use std::collections::HashMap;

use crate::article::{Article, ImpactCategory, SourceTier};
use crate::config::CycleLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    SuppressedByHighCore,
    CycleLimitExceeded,
    TopicRedundancy,
    LowImpact,
    /// MED left over in a cycle that sends HIGH from non-CORE sources.
    DeferredByHigh,
}

#[derive(Debug, Clone, Serialize)]
pub struct Suppressed {
    pub article: Article,
    pub reason: SuppressionReason,
    /// Fingerprint of the article kept in its place (topic redundancy only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kept: Option<String>,
}

impl Suppressed {
    fn new(article: Article, reason: SuppressionReason) -> Self {
        Self {
            article,
            reason,
            kept: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SelectionMetrics {
    pub total_processed: usize,
    pub selected: usize,
    pub suppressed: usize,
    pub high_count: usize,
    pub med_count: usize,
    pub low_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Selection {
    pub selected: Vec<Article>,
    pub suppressed: Vec<Suppressed>,
    pub metrics: SelectionMetrics,
}

/// First three tokens of the canonical title; the fingerprint when the title is empty.
pub fn topic_key(article: &Article) -> String {
    let key = article
        .canonical_title
        .split_whitespace()
        .take(3)
        .collect::<Vec<_>>()
        .join(" ");
    if key.is_empty() {
        article.fingerprint.clone()
    } else {
        key
    }
}

fn truncate(
    mut articles: Vec<Article>,
    max: usize,
    suppressed: &mut Vec<Suppressed>,
) -> Vec<Article> {
    if articles.len() > max {
        for a in articles.split_off(max) {
            suppressed.push(Suppressed::new(a, SuppressionReason::CycleLimitExceeded));
        }
    }
    articles
}

pub fn select_final_articles(articles: Vec<Article>, limits: &CycleLimits) -> Selection {
    let total_processed = articles.len();
    let mut high = Vec::new();
    let mut med = Vec::new();
    let mut low = Vec::new();
    for a in articles {
        match a.impact_category {
            ImpactCategory::High => high.push(a),
            ImpactCategory::Med => med.push(a),
            ImpactCategory::Low => low.push(a),
        }
    }
    // Stable: equal scores keep input order.
    high.sort_by(|a, b| b.impact_score.cmp(&a.impact_score));
    med.sort_by(|a, b| b.impact_score.cmp(&a.impact_score));
    let (high_count, med_count, low_count) = (high.len(), med.len(), low.len());

    let mut suppressed = Vec::new();

    let med_suppressed = high.iter().any(|a| a.source_tier == SourceTier::Core);
    let mut remaining_med = Vec::new();
    if med_suppressed {
        for a in med {
            suppressed.push(Suppressed::new(a, SuppressionReason::SuppressedByHighCore));
        }
    } else {
        remaining_med = med;
    }

    let high = truncate(high, limits.max_high_per_cycle, &mut suppressed);
    let candidates = if high.is_empty() {
        truncate(remaining_med, limits.max_med_per_cycle, &mut suppressed)
    } else {
        for a in remaining_med {
            suppressed.push(Suppressed::new(a, SuppressionReason::DeferredByHigh));
        }
        high
    };

    let mut kept_by_topic: HashMap<String, String> = HashMap::new();
    let mut selected = Vec::with_capacity(candidates.len());
    for a in candidates {
        let key = topic_key(&a);
        if let Some(kept) = kept_by_topic.get(&key) {
            suppressed.push(Suppressed {
                kept: Some(kept.clone()),
                article: a,
                reason: SuppressionReason::TopicRedundancy,
            });
        } else {
            kept_by_topic.insert(key, a.fingerprint.clone());
            selected.push(a);
        }
    }

    for a in low {
        suppressed.push(Suppressed::new(a, SuppressionReason::LowImpact));
    }

    for (i, a) in selected.iter_mut().enumerate() {
        a.send_order = Some(i as u32 + 1);
    }

    let metrics = SelectionMetrics {
        total_processed,
        selected: selected.len(),
        suppressed: suppressed.len(),
        high_count,
        med_count,
        low_count,
    };
    Selection {
        selected,
        suppressed,
        metrics,
    }
}
