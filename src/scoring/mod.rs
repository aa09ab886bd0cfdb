//! Impact scoring.
//!
//! `score = round(topic*0.40 + 50*kw*0.25 + 70*source_weight*0.20 + 60*scope*0.15)`
//! then classified against the table thresholds, with two overrides:
//! an extreme keyword forces HIGH, and a CORE macro story is never LOW.

pub mod keywords;

use crate::article::{Article, ImpactCategory, SourceTier, TopicLevel};

pub use keywords::{
    load_keywords_default, load_keywords_file, HotReloadKeywords, KeywordTables, Thresholds,
    TopicTier,
};

const W_TOPIC: f64 = 0.40;
const W_KEYWORD: f64 = 0.25;
const W_SOURCE: f64 = 0.20;
const W_SCOPE: f64 = 0.15;

/// Case-insensitive phrase hit. `text` is already lowercased; phrases may
/// come from a table that was never passed through `normalized()`.
fn hit(text: &str, phrase: &str) -> bool {
    let phrase = phrase.trim();
    if phrase.is_empty() {
        return false;
    }
    if phrase.chars().any(char::is_uppercase) {
        text.contains(phrase.to_lowercase().as_str())
    } else {
        text.contains(phrase)
    }
}

fn any_hit(text: &str, list: &[String]) -> bool {
    list.iter().any(|k| hit(text, k))
}

fn count_hits(text: &str, list: &[String]) -> usize {
    list.iter().filter(|k| hit(text, k)).count()
}

/// Highest-scoring topic tier with a substring hit in `text` (lowercased).
/// Tier order in the table does not matter; equal scores keep the first.
pub fn topic_score(text: &str, tables: &KeywordTables) -> (u32, TopicLevel) {
    tables
        .topics
        .iter()
        .filter(|t| any_hit(text, &t.keywords))
        .fold(None::<&TopicTier>, |best, t| match best {
            Some(b) if b.score >= t.score => Some(b),
            _ => Some(t),
        })
        .map(|t| (t.score, t.level))
        .unwrap_or((tables.default_topic_score, TopicLevel::General))
}

pub fn keyword_multiplier(text: &str, tables: &KeywordTables) -> f64 {
    let hard = count_hits(text, &tables.hard);
    let soft = count_hits(text, &tables.soft);
    match hard {
        h if h >= 2 => 1.5,
        1 => 1.3,
        _ if soft > hard => 0.8,
        _ => 1.0,
    }
}

/// Index-wide > multi-sector > sector phrases; otherwise a lone ticker
/// mention narrows the scope.
pub fn scope_multiplier(text: &str, has_tickers: bool, tables: &KeywordTables) -> f64 {
    if any_hit(text, &tables.scope.index_wide) {
        1.5
    } else if any_hit(text, &tables.scope.multi_sector) {
        1.2
    } else if any_hit(text, &tables.scope.sector) {
        1.0
    } else if has_tickers {
        0.8
    } else {
        1.0
    }
}

pub fn has_extreme_keyword(text: &str, tables: &KeywordTables) -> bool {
    any_hit(text, &tables.extreme)
}

pub fn impact_score(topic: u32, keyword_mult: f64, source_weight: f64, scope_mult: f64) -> i64 {
    let raw = f64::from(topic) * W_TOPIC
        + 50.0 * keyword_mult * W_KEYWORD
        + 70.0 * source_weight * W_SOURCE
        + 60.0 * scope_mult * W_SCOPE;
    raw.round() as i64
}

pub fn classify(score: i64, thresholds: &Thresholds) -> ImpactCategory {
    if score >= thresholds.high {
        ImpactCategory::High
    } else if score >= thresholds.med {
        ImpactCategory::Med
    } else {
        ImpactCategory::Low
    }
}

/// Fill the scoring fields of `article`. Pure; never fails.
pub fn score_article(mut article: Article, tables: &KeywordTables) -> Article {
    let text = article.search_text();
    let (topic, level) = topic_score(&text, tables);
    let kw = keyword_multiplier(&text, tables);
    let scope = scope_multiplier(&text, !article.tickers.is_empty(), tables);
    let extreme = has_extreme_keyword(&text, tables);

    let weight = if article.source_weight.is_finite() && article.source_weight > 0.0 {
        article.source_weight
    } else {
        1.0
    };
    let score = impact_score(topic, kw, weight, scope);

    let mut category = classify(score, &tables.thresholds);
    if extreme {
        category = ImpactCategory::High;
    }
    if article.source_tier == SourceTier::Core
        && level == TopicLevel::Macro
        && category == ImpactCategory::Low
    {
        category = ImpactCategory::Med;
    }

    article.topic_score = topic;
    article.topic_level = level;
    article.keyword_multiplier = kw;
    article.scope_multiplier = scope;
    article.has_extreme_keyword = extreme;
    article.impact_score = score;
    article.impact_category = category;
    article
}

pub fn score_all(articles: Vec<Article>, tables: &KeywordTables) -> Vec<Article> {
    articles
        .into_iter()
        .map(|a| score_article(a, tables))
        .collect()
}
