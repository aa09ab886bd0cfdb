//! Versioned keyword tables driving impact scoring, with hot-reload from
//! `config/keywords.json`.
//!
//! JSON shape (every field optional, missing ones take the seed value):
//! {
//!   "version": "2025-10-a",
//!   "hard": ["anjlok", ...],
//!   "soft": ["berpotensi", ...],
//!   "extreme": ["krisis sistemik", ...],
//!   "topics": [{ "level": "macro", "score": 90, "keywords": ["bi rate", ...] }, ...],
//!   "default_topic_score": 10,
//!   "scope": { "index_wide": [...], "multi_sector": [...], "sector": [...] },
//!   "thresholds": { "high": 75, "med": 50 }
//! }

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::SystemTime,
};

use crate::article::TopicLevel;

const ENV_PATH: &str = "KEYWORDS_CONFIG_PATH";
pub const DEFAULT_KEYWORDS_PATH: &str = "config/keywords.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicTier {
    pub level: TopicLevel,
    pub score: u32,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeTables {
    pub index_wide: Vec<String>,
    pub multi_sector: Vec<String>,
    pub sector: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub high: i64,
    pub med: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self { high: 75, med: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordTables {
    pub version: String,
    pub hard: Vec<String>,
    pub soft: Vec<String>,
    pub extreme: Vec<String>,
    /// Highest-ranked first; the first tier with a match wins.
    pub topics: Vec<TopicTier>,
    pub default_topic_score: u32,
    pub scope: ScopeTables,
    pub thresholds: Thresholds,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for ScopeTables {
    fn default() -> Self {
        Self {
            index_wide: words(&["ihsg", "pasar saham indonesia", "indeks utama", "market-wide"]),
            multi_sector: words(&["multi sektor", "beberapa sektor"]),
            sector: words(&["sektor", "industri"]),
        }
    }
}

impl Default for KeywordTables {
    fn default() -> Self {
        Self::seed()
    }
}

impl KeywordTables {
    /// Built-in Indonesian market vocabulary.
    pub fn seed() -> Self {
        Self {
            version: "seed-1".to_string(),
            hard: words(&[
                "outlook negatif", "anjlok", "melonjak", "asing keluar", "capital outflow",
                "intervensi", "suspensi", "investigasi", "fraud", "likuidasi", "pailit",
                "devaluasi", "emergency", "peringatan", "risiko tinggi",
            ]),
            soft: words(&[
                "berpotensi", "diperkirakan", "diproyeksikan", "kemungkinan", "prospek",
                "target", "optimis", "menunggu", "jika", "apabila",
            ]),
            extreme: words(&[
                "krisis sistemik", "intervensi bi", "capital control", "suspensi perdagangan",
                "investigasi ojk", "gagal bayar sistemik", "default sovereign",
            ]),
            topics: vec![
                TopicTier {
                    level: TopicLevel::Macro,
                    score: 90,
                    keywords: words(&[
                        "bi rate", "suku bunga", "rating utang", "s&p", "moody", "fitch",
                        "apbn", "defisit", "fiskal", "fed", "fomc",
                    ]),
                },
                TopicTier {
                    level: TopicLevel::Market,
                    score: 75,
                    keywords: words(&[
                        "ihsg", "asing", "net buy", "net sell", "rupiah", "usd/idr",
                        "yield obligasi", "sun", "msci", "ftse",
                    ]),
                },
                TopicTier {
                    level: TopicLevel::Sector,
                    score: 50,
                    keywords: words(&[
                        "sektor", "finansial", "energi", "tambang", "komoditas", "regulasi",
                        "kebijakan sektoral",
                    ]),
                },
                TopicTier {
                    level: TopicLevel::Issuer,
                    score: 20,
                    keywords: words(&[
                        "emiten", "laba", "dividen", "rights issue", "m&a", "akuisisi", "merger",
                        "laporan keuangan",
                    ]),
                },
            ],
            default_topic_score: 10,
            scope: ScopeTables::default(),
            thresholds: Thresholds::default(),
        }
    }

    /// Lowercase and trim every phrase, drop empties, sort topics by score.
    pub fn normalized(mut self) -> Self {
        fn clean(list: &mut Vec<String>) {
            *list = list
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
        }
        clean(&mut self.hard);
        clean(&mut self.soft);
        clean(&mut self.extreme);
        clean(&mut self.scope.index_wide);
        clean(&mut self.scope.multi_sector);
        clean(&mut self.scope.sector);
        for t in &mut self.topics {
            clean(&mut t.keywords);
        }
        self.topics.sort_by(|a, b| b.score.cmp(&a.score));
        self
    }
}

/// Load tables directly (no caching).
pub fn load_keywords_file(path: &Path) -> Result<KeywordTables> {
    let bytes = fs::read(path).with_context(|| format!("reading keywords from {}", path.display()))?;
    let t: KeywordTables = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing keywords {}", path.display()))?;
    Ok(t.normalized())
}

/// $KEYWORDS_CONFIG_PATH → config/keywords.json → built-in seed.
pub fn load_keywords_default() -> Result<KeywordTables> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if !pb.exists() {
            return Err(anyhow!("KEYWORDS_CONFIG_PATH points to non-existent path"));
        }
        return load_keywords_file(&pb);
    }
    let default_path = PathBuf::from(DEFAULT_KEYWORDS_PATH);
    if default_path.exists() {
        return load_keywords_file(&default_path);
    }
    Ok(KeywordTables::seed().normalized())
}

/// Hot-reload wrapper: reloads when the file mtime changes. A missing or
/// invalid file keeps the last good tables.
#[derive(Debug)]
pub struct HotReloadKeywords {
    path: PathBuf,
    inner: RwLock<State>,
}

#[derive(Debug)]
struct State {
    tables: Arc<KeywordTables>,
    last_modified: Option<SystemTime>,
}

impl HotReloadKeywords {
    pub fn new(path: Option<&Path>) -> Self {
        Self::with_initial(path, KeywordTables::seed().normalized())
    }

    /// Watch `$KEYWORDS_CONFIG_PATH` (or the default path), starting from
    /// whatever `load_keywords_default` resolves.
    pub fn from_env() -> Result<Self> {
        let initial = load_keywords_default()?;
        let path = std::env::var(ENV_PATH).ok().map(PathBuf::from);
        Ok(Self::with_initial(path.as_deref(), initial))
    }

    pub fn with_initial(path: Option<&Path>, initial: KeywordTables) -> Self {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_KEYWORDS_PATH));
        Self {
            path,
            inner: RwLock::new(State {
                tables: Arc::new(initial),
                last_modified: None,
            }),
        }
    }

    pub fn current(&self) -> Arc<KeywordTables> {
        let mtime = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(m) => m,
            Err(_) => return self.snapshot(),
        };
        {
            let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
            if guard.last_modified == Some(mtime) {
                return Arc::clone(&guard.tables);
            }
        }

        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if guard.last_modified != Some(mtime) {
            match load_keywords_file(&self.path) {
                Ok(t) => {
                    tracing::info!(target: "scoring", version = %t.version, "keyword tables reloaded");
                    guard.tables = Arc::new(t);
                }
                Err(e) => {
                    tracing::warn!(target: "scoring", error = ?e, "keyword reload failed, keeping previous tables");
                }
            }
            guard.last_modified = Some(mtime);
        }
        Arc::clone(&guard.tables)
    }

    fn snapshot(&self) -> Arc<KeywordTables> {
        Arc::clone(&self.inner.read().unwrap_or_else(|e| e.into_inner()).tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Write, thread, time::Duration};

    #[test]
    fn partial_json_keeps_seed_fields() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("keywords.json");
        fs::write(&p, r#"{"version":"v2","hard":[" CRASH "],"thresholds":{"high":80}}"#).unwrap();
        let t = load_keywords_file(&p).unwrap();
        assert_eq!(t.version, "v2");
        assert_eq!(t.hard, vec!["crash"]);
        assert_eq!(t.thresholds.high, 80);
        assert_eq!(t.thresholds.med, 50);
        assert_eq!(t.topics.len(), 4);
    }

    #[test]
    fn hot_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keywords.json");

        let hot = HotReloadKeywords::new(Some(&path));
        assert_eq!(hot.current().version, "seed-1");

        {
            let mut f = fs::File::create(&path).unwrap();
            write!(f, r#"{{"version":"v1"}}"#).unwrap();
            f.sync_all().unwrap();
        }
        assert_eq!(hot.current().version, "v1");

        thread::sleep(Duration::from_millis(1100));
        {
            let mut f = fs::File::create(&path).unwrap();
            write!(f, r#"{{"version":"v2"}}"#).unwrap();
            f.sync_all().unwrap();
        }
        assert_eq!(hot.current().version, "v2");

        // Broken file keeps the previous tables.
        thread::sleep(Duration::from_millis(1100));
        fs::write(&path, "{ nope").unwrap();
        assert_eq!(hot.current().version, "v2");
    }
}
