// src/broadcast/format.rs
//! Telegram (legacy Markdown) message cards.

use chrono::FixedOffset;

use crate::article::{Article, ImpactCategory};

const EXCERPT_CHARS: usize = 200;
const NO_DESCRIPTION: &str = "Tidak ada deskripsi";
const DISCLAIMER: &str = "Ini adalah informasi untuk keperluan analisis. Lakukan riset mandiri sebelum mengambil keputusan investasi.";

/// Escape characters that legacy Markdown would treat as entity markers.
pub fn escape_markdown(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Indonesian zone label for the common offsets, `UTC+h` otherwise.
pub fn zone_label(offset: FixedOffset) -> String {
    match offset.local_minus_utc() / 3600 {
        7 => "WIB".to_string(),
        8 => "WITA".to_string(),
        9 => "WIT".to_string(),
        h => format!("UTC{h:+}"),
    }
}

pub fn excerpt(description: &str) -> String {
    let d = description.trim();
    if d.is_empty() {
        return NO_DESCRIPTION.to_string();
    }
    if d.chars().count() > EXCERPT_CHARS {
        let cut: String = d.chars().take(EXCERPT_CHARS).collect();
        format!("{}...", cut.trim_end())
    } else {
        d.to_string()
    }
}

fn link_line(article: &Article) -> String {
    if article.link.is_empty() {
        String::new()
    } else {
        format!("\n\n🔗 [Baca Selengkapnya]({})", article.link)
    }
}

pub fn format_high(article: &Article, offset: FixedOffset) -> String {
    let local = article.published_at.with_timezone(&offset);
    format!(
        "🚨 *[IMPACT HIGH]* {title}\n\n📌 *Topik:* {source}\n📍 *Sumber:* {tier}\n⏰ *Waktu:* {time} {zone}\n\n_{desc}_{link}\n\n⚠️ _{DISCLAIMER}_",
        title = escape_markdown(&article.title),
        source = escape_markdown(&article.source),
        tier = article.source_tier,
        time = local.format("%d/%m/%Y %H:%M"),
        zone = zone_label(offset),
        desc = escape_markdown(&excerpt(&article.description)),
        link = link_line(article),
    )
}

pub fn format_med(article: &Article, offset: FixedOffset) -> String {
    let local = article.published_at.with_timezone(&offset);
    format!(
        "📈 {title}{link}\n⏰ {time} {zone} | 📍 {source}",
        title = escape_markdown(&article.title),
        link = link_line(article),
        time = local.format("%d/%m %H:%M"),
        zone = zone_label(offset),
        source = escape_markdown(&article.source),
    )
}

/// Card for the article's category; cards sent inside the quiet window are tagged.
pub fn format_message(article: &Article, offset: FixedOffset, quiet: bool) -> String {
    let body = match article.impact_category {
        ImpactCategory::High => format_high(article, offset),
        ImpactCategory::Med | ImpactCategory::Low => format_med(article, offset),
    };
    if quiet {
        format!("[QUIET HOURS] {body}")
    } else {
        body
    }
}
