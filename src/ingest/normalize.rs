// src/ingest/normalize.rs
//! Raw feed item → `Article`: text cleanup, date parsing into the local
//! offset, hour bucket, canonical title, tickers and fingerprint.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::article::{Article, ImpactCategory, TopicLevel};
use crate::config::{ArticleFilter, SourceConfig};
use crate::dedup;
use crate::ingest::types::RawArticle;

/// Articles dated further ahead than this are treated as future-dated.
const FUTURE_TOLERANCE_MINUTES: i64 = 5;
const MAX_TEXT_CHARS: usize = 1500;

fn re(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

/// Decode entities, drop CDATA markers and HTML tags, normalize typographic
/// quotes, collapse whitespace, cap length.
pub fn clean_text(s: &str) -> String {
    static RE_CDATA: OnceCell<Regex> = OnceCell::new();
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    static RE_WS: OnceCell<Regex> = OnceCell::new();

    let out = re(&RE_CDATA, r"<!\[CDATA\[|\]\]>").replace_all(s, "");
    let out = html_escape::decode_html_entities(&out).to_string();
    let out = re(&RE_TAGS, r"(?is)</?[^>]+>").replace_all(&out, " ");
    let out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{00A0}', " ");
    let out = re(&RE_WS, r"\s+").replace_all(&out, " ");
    let out = out.trim();

    if out.chars().count() > MAX_TEXT_CHARS {
        out.chars().take(MAX_TEXT_CHARS).collect()
    } else {
        out.to_string()
    }
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn canonical_title(title: &str) -> String {
    static RE_PUNCT: OnceCell<Regex> = OnceCell::new();
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let lower = title.to_lowercase();
    let stripped = re(&RE_PUNCT, r"[^\w\s]").replace_all(&lower, "");
    re(&RE_WS, r"\s+")
        .replace_all(&stripped, " ")
        .trim()
        .to_string()
}

/// Isolated 4-letter uppercase tokens, first occurrence order, no repeats.
pub fn extract_tickers(text: &str) -> Vec<String> {
    static RE_TICKER: OnceCell<Regex> = OnceCell::new();
    let mut out: Vec<String> = Vec::new();
    for m in re(&RE_TICKER, r"\b[A-Z]{4}\b").find_iter(text) {
        if !out.iter().any(|t| t == m.as_str()) {
            out.push(m.as_str().to_string());
        }
    }
    out
}

/// RFC 2822, then RFC 3339, then a bare `YYYY-MM-DD HH:MM:SS` read in `offset`.
pub fn parse_pub_date(raw: &str, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .and_then(|n| offset.from_local_datetime(&n).single())
        })
}

/// `YYYY-MM-DDTHH` of a timestamp already in the local offset.
pub fn hour_bucket(ts: &DateTime<FixedOffset>) -> String {
    ts.format("%Y-%m-%dT%H").to_string()
}

/// Build an unscored `Article`. Returns `None` for items without a title.
pub fn normalize_article(
    raw: RawArticle,
    source: &SourceConfig,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> Option<Article> {
    let title = clean_text(&raw.title);
    if title.is_empty() {
        return None;
    }
    let description = raw.description.as_deref().map(clean_text).unwrap_or_default();
    let link = raw.link.map(|l| l.trim().to_string()).unwrap_or_default();

    let parsed = raw.pub_date.as_deref().and_then(|d| parse_pub_date(d, offset));
    let date_fallback = parsed.is_none();
    if date_fallback {
        tracing::debug!(target: "ingest", source = %source.name, raw = ?raw.pub_date, "publish date missing or unparsable, using now");
    }
    let published_at = parsed
        .unwrap_or_else(|| now.fixed_offset())
        .with_timezone(&offset);

    let canonical = canonical_title(&title);
    let hour = hour_bucket(&published_at);
    let source_domain = source.domain();
    let tickers = extract_tickers(&format!("{title} {description}"));
    let fingerprint = dedup::fingerprint_parts(&link, &canonical, &hour, &source_domain);

    Some(Article {
        title,
        link,
        raw_pub_date: raw.pub_date,
        description,
        source: source.name.clone(),
        source_tier: source.tier,
        source_weight: source.weight,
        source_domain,
        canonical_title: canonical,
        hour_bucket: hour,
        published_at,
        date_fallback,
        tickers,
        fingerprint,
        topic_score: 0,
        topic_level: TopicLevel::General,
        keyword_multiplier: 1.0,
        scope_multiplier: 1.0,
        has_extreme_keyword: false,
        impact_score: 0,
        impact_category: ImpactCategory::Low,
        send_order: None,
    })
}

/// Too old, or dated in the future when `skip_future_date` is set → stale.
pub fn is_fresh(article: &Article, filter: &ArticleFilter, now: DateTime<Utc>) -> bool {
    let ts = article.published_at.with_timezone(&Utc);
    if now - ts > ChronoDuration::hours(filter.max_age_hours) {
        return false;
    }
    if filter.skip_future_date && ts - now > ChronoDuration::minutes(FUTURE_TOLERANCE_MINUTES) {
        return false;
    }
    true
}

/// Keep fresh articles in order; returns them with the number dropped.
pub fn filter_fresh(
    articles: Vec<Article>,
    filter: &ArticleFilter,
    now: DateTime<Utc>,
) -> (Vec<Article>, usize) {
    let before = articles.len();
    let kept: Vec<Article> = articles
        .into_iter()
        .filter(|a| is_fresh(a, filter, now))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::SourceTier;

    fn wib() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    fn source() -> SourceConfig {
        SourceConfig::new("CNBC", "https://www.cnbcindonesia.com/market/rss", SourceTier::Core, 5000, 1.2)
    }

    #[test]
    fn clean_text_strips_markup_and_entities() {
        let s = "  <p>Rupiah&nbsp;<b>melemah</b></p> &amp; IHSG  \n turun ";
        assert_eq!(clean_text(s), "Rupiah melemah & IHSG turun");
    }

    #[test]
    fn canonical_title_lowercases_and_drops_punctuation() {
        assert_eq!(canonical_title("  IHSG Anjlok 3%!  Asing  Keluar... "), "ihsg anjlok 3 asing keluar");
    }

    #[test]
    fn tickers_are_detected_case_sensitively() {
        assert_eq!(extract_tickers("Saham BBRI dan BBCA naik, bbni tidak; BBRI lagi"), vec!["BBRI", "BBCA"]);
        assert!(extract_tickers("ABCDE is not a ticker").is_empty());
    }

    #[test]
    fn date_converts_to_local_hour_bucket() {
        let now = Utc::now();
        let raw = RawArticle {
            title: "BI Rate tetap".into(),
            link: Some("https://x.example/a".into()),
            pub_date: Some("Tue, 14 Oct 2025 20:30:00 GMT".into()),
            description: None,
        };
        let a = normalize_article(raw, &source(), wib(), now).unwrap();
        assert_eq!(a.hour_bucket, "2025-10-15T03");
        assert!(!a.date_fallback);
        assert_eq!(a.fingerprint.len(), 16);
        assert_eq!(a.source_domain, "www.cnbcindonesia.com");
    }

    #[test]
    fn invalid_date_falls_back_to_now() {
        let now = Utc.with_ymd_and_hms(2025, 10, 14, 1, 0, 0).unwrap();
        let raw = RawArticle {
            title: "Judul".into(),
            pub_date: Some("kemarin sore".into()),
            ..Default::default()
        };
        let a = normalize_article(raw, &source(), wib(), now).unwrap();
        assert!(a.date_fallback);
        assert_eq!(a.hour_bucket, "2025-10-14T08");
        assert!(a.link.is_empty());
    }

    #[test]
    fn freshness_drops_old_and_future_items() {
        let now = Utc.with_ymd_and_hms(2025, 10, 14, 12, 0, 0).unwrap();
        let mk = |ts: DateTime<Utc>| {
            let raw = RawArticle {
                title: "x".into(),
                pub_date: Some(ts.to_rfc3339()),
                ..Default::default()
            };
            normalize_article(raw, &source(), wib(), now).unwrap()
        };
        let f = ArticleFilter::default();
        assert!(is_fresh(&mk(now - ChronoDuration::hours(23)), &f, now));
        assert!(!is_fresh(&mk(now - ChronoDuration::hours(25)), &f, now));
        assert!(!is_fresh(&mk(now + ChronoDuration::hours(1)), &f, now));
        assert!(is_fresh(&mk(now + ChronoDuration::minutes(2)), &f, now));
    }
}
