//! Deduplication against the dispatched ledger and within one cycle.
//!
//! `filter_duplicates` only reads the ledger. The single write,
//! `mark_dispatched`, happens after dispatch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::article::Article;
use crate::store::{DispatchedMarker, Ledger, StoreError};

const FINGERPRINT_HEX_LEN: usize = 16;

fn short_sha256(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_HEX_LEN);
    hex
}

/// Link-based when a link is present, otherwise title/hour/domain based.
pub fn fingerprint_parts(link: &str, canonical_title: &str, hour_bucket: &str, domain: &str) -> String {
    let link = link.trim();
    if !link.is_empty() {
        short_sha256(&link.to_lowercase())
    } else {
        short_sha256(&format!("{canonical_title}|{hour_bucket}|{domain}"))
    }
}

pub fn fingerprint(article: &Article) -> String {
    fingerprint_parts(
        &article.link,
        &article.canonical_title,
        &article.hour_bucket,
        &article.source_domain,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateReason {
    AlreadyDispatched,
    SameCycleDuplicate,
    CrossSourceDuplicate,
}

#[derive(Debug, Clone, Serialize)]
pub struct Duplicate {
    pub article: Article,
    pub reason: DuplicateReason,
    /// Fingerprint of the article that was kept instead, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kept: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupOutcome {
    pub unique: Vec<Article>,
    pub duplicates: Vec<Duplicate>,
}

/// Split `articles` into unique and duplicate. `unique` keeps input order.
pub async fn filter_duplicates(
    articles: Vec<Article>,
    ledger: &Ledger,
) -> Result<DedupOutcome, StoreError> {
    let mut duplicates = Vec::new();
    // (input position, article)
    let mut survivors: Vec<(usize, Article)> = Vec::with_capacity(articles.len());
    let mut seen: HashSet<String> = HashSet::new();

    for (pos, article) in articles.into_iter().enumerate() {
        if ledger.is_dispatched(&article.fingerprint).await? {
            duplicates.push(Duplicate {
                article,
                reason: DuplicateReason::AlreadyDispatched,
                kept: None,
            });
            continue;
        }
        if !seen.insert(article.fingerprint.clone()) {
            let kept = Some(article.fingerprint.clone());
            duplicates.push(Duplicate {
                article,
                reason: DuplicateReason::SameCycleDuplicate,
                kept,
            });
            continue;
        }
        survivors.push((pos, article));
    }

    // Cross-source: same canonical title, keep best (tier, publish time, position).
    let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (idx, (_, a)) in survivors.iter().enumerate() {
        if !a.canonical_title.is_empty() {
            groups.entry(a.canonical_title.as_str()).or_default().push(idx);
        }
    }
    let mut dropped: HashMap<usize, String> = HashMap::new();
    for members in groups.values().filter(|m| m.len() > 1) {
        let best = members
            .iter()
            .copied()
            .min_by_key(|&i| {
                let (pos, a) = &survivors[i];
                (a.source_tier.rank(), a.published_at.timestamp_millis(), *pos)
            })
            .unwrap_or(members[0]);
        let kept_fp = survivors[best].1.fingerprint.clone();
        for &i in members.iter().filter(|&&i| i != best) {
            dropped.insert(i, kept_fp.clone());
        }
    }

    let mut unique = Vec::with_capacity(survivors.len() - dropped.len());
    for (idx, (_, article)) in survivors.into_iter().enumerate() {
        match dropped.remove(&idx) {
            Some(kept) => duplicates.push(Duplicate {
                article,
                reason: DuplicateReason::CrossSourceDuplicate,
                kept: Some(kept),
            }),
            None => unique.push(article),
        }
    }

    tracing::debug!(
        target: "dedup",
        unique = unique.len(),
        duplicates = duplicates.len(),
        "dedup complete"
    );
    Ok(DedupOutcome { unique, duplicates })
}

/// Tags stored on the dispatched marker: topic level plus detected tickers.
pub fn topic_tags(article: &Article) -> Vec<String> {
    let level = serde_json::to_value(article.topic_level)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string));
    level.into_iter().chain(article.tickers.iter().cloned()).collect()
}

/// Record `article` as dispatched under its fingerprint.
pub async fn mark_dispatched(
    article: &Article,
    ledger: &Ledger,
    cycle_id: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let marker = DispatchedMarker {
        sent_timestamp: now,
        impact_category: article.impact_category,
        source_tier: article.source_tier,
        topic_tags: topic_tags(article),
        execution_id: cycle_id.to_string(),
    };
    ledger.mark_dispatched(&article.fingerprint, &marker).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_fingerprint_ignores_case_and_whitespace() {
        let a = fingerprint_parts(" https://News.example/A ", "x", "h", "d");
        let b = fingerprint_parts("https://news.example/a", "y", "z", "w");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fallback_fingerprint_uses_title_hour_domain() {
        let a = fingerprint_parts("", "bi rate naik", "2025-10-14T09", "a.example");
        let b = fingerprint_parts("  ", "bi rate naik", "2025-10-14T10", "a.example");
        assert_ne!(a, b);
        assert_eq!(a, short_sha256("bi rate naik|2025-10-14T09|a.example"));
    }
}
