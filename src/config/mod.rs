// src/config/mod.rs
//! Application configuration.
//!
//! Resolution order for `AppConfig::load_default()`:
//! 1) `$APP_CONFIG_PATH` (must exist)
//! 2) `config/app.toml`
//! 3) built-in defaults
//!
//! Secrets never live in the file; they are overlaid from the environment
//! (`BOT_TOKEN`, `KV_REST_API_URL`, `KV_REST_API_TOKEN`, `ADMIN_USER_IDS`,
//! `CRON_SECRET`). Call `dotenvy::dotenv()` first in binaries.

pub mod sources;

use anyhow::{anyhow, Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use sources::{load_sources_default, load_sources_from, SourceConfig, SourcesConfig};

pub const ENV_APP_CONFIG_PATH: &str = "APP_CONFIG_PATH";
pub const DEFAULT_APP_CONFIG_PATH: &str = "config/app.toml";

/// Per-cycle caps used by the selection engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleLimits {
    pub max_high_per_cycle: usize,
    pub max_med_per_cycle: usize,
}

impl Default for CycleLimits {
    fn default() -> Self {
        Self {
            max_high_per_cycle: 5,
            max_med_per_cycle: 3,
        }
    }
}

/// What may still go out while the quiet window is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuietHoursException {
    /// Quiet window has no effect.
    AlwaysSend,
    /// Only articles carrying an extreme keyword.
    #[default]
    ExtremeOnly,
    /// Any HIGH article.
    HighOnly,
    /// Nothing is sent inside the window.
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuietHoursConfig {
    pub enabled: bool,
    /// Local hour (0-23) at which the window opens.
    pub start: u32,
    /// Local hour (0-23) at which the window closes (exclusive).
    pub end: u32,
    pub exception: QuietHoursException,
}

impl Default for QuietHoursConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start: 22,
            end: 6,
            exception: QuietHoursException::ExtremeOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    pub dispatched_secs: u64,
    pub delivered_secs: u64,
    pub circuit_breaker_secs: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            dispatched_secs: 7 * 24 * 3600,
            delivered_secs: 7 * 24 * 3600,
            circuit_breaker_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Pause after every outbound send (transport throughput limit).
    pub send_delay_ms: u64,
    /// Additional attempts after the first one for transient failures.
    pub retry_budget: u32,
    pub retry_delay_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_delay_ms: 300,
            retry_budget: 1,
            retry_delay_ms: 1000,
        }
    }
}

impl DispatchConfig {
    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before a source is skipped.
    pub failure_threshold: u32,
    pub cooldown_secs: i64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArticleFilter {
    pub max_age_hours: i64,
    pub skip_future_date: bool,
}

impl Default for ArticleFilter {
    fn default() -> Self {
        Self {
            max_age_hours: 24,
            skip_future_date: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cycle: CycleLimits,
    pub quiet_hours: QuietHoursConfig,
    pub ttl: TtlConfig,
    pub dispatch: DispatchConfig,
    pub breaker: BreakerConfig,
    pub article_filter: ArticleFilter,
    /// Fixed local offset used for hour buckets, quiet hours and message times.
    pub timezone_offset_hours: i32,
    pub health_stale_after_minutes: i64,
    pub admin_user_ids: Vec<String>,
    #[serde(skip_serializing)]
    pub bot_token: Option<String>,
    #[serde(skip_serializing)]
    pub cron_secret: Option<String>,
    pub kv_rest_api_url: Option<String>,
    #[serde(skip_serializing)]
    pub kv_rest_api_token: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cycle: CycleLimits::default(),
            quiet_hours: QuietHoursConfig::default(),
            ttl: TtlConfig::default(),
            dispatch: DispatchConfig::default(),
            breaker: BreakerConfig::default(),
            article_filter: ArticleFilter::default(),
            timezone_offset_hours: 7,
            health_stale_after_minutes: 30,
            admin_user_ids: Vec::new(),
            bot_token: None,
            cron_secret: None,
            kv_rest_api_url: None,
            kv_rest_api_token: None,
        }
    }
}

impl AppConfig {
    /// Parse a TOML file; missing fields take their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading app config from {}", path.display()))?;
        let cfg: AppConfig = toml::from_str(&content)
            .with_context(|| format!("parsing app config {}", path.display()))?;
        Ok(cfg.sanitized())
    }

    /// Env path → `config/app.toml` → defaults, then env overrides.
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_APP_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_APP_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let default_path = PathBuf::from(DEFAULT_APP_CONFIG_PATH);
            if default_path.exists() {
                Self::load_from(&default_path)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Overlay secrets and deployment-specific values from the environment.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = non_empty_env("BOT_TOKEN") {
            self.bot_token = Some(v);
        }
        if let Some(v) = non_empty_env("CRON_SECRET") {
            self.cron_secret = Some(v);
        }
        if let Some(v) = non_empty_env("KV_REST_API_URL") {
            self.kv_rest_api_url = Some(v);
        }
        if let Some(v) = non_empty_env("KV_REST_API_TOKEN") {
            self.kv_rest_api_token = Some(v);
        }
        if let Some(v) = non_empty_env("ADMIN_USER_IDS") {
            self.admin_user_ids = parse_id_list(&v);
        }
    }

    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.timezone_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        let id = user_id.trim();
        !id.is_empty() && self.admin_user_ids.iter().any(|a| a == id)
    }

    fn sanitized(mut self) -> Self {
        self.quiet_hours.start %= 24;
        self.quiet_hours.end %= 24;
        if !(-12..=14).contains(&self.timezone_offset_hours) {
            self.timezone_offset_hours = 7;
        }
        if self.breaker.failure_threshold == 0 {
            self.breaker.failure_threshold = 1;
        }
        self.admin_user_ids = self
            .admin_user_ids
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        self
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `"1, 2,,3"` → `["1", "2", "3"]`
pub fn parse_id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("app.toml");
        fs::write(
            &p,
            r#"
timezone_offset_hours = 8

[cycle]
max_high_per_cycle = 2

[quiet_hours]
start = 23
exception = "high_only"
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&p).unwrap();
        assert_eq!(cfg.cycle.max_high_per_cycle, 2);
        assert_eq!(cfg.cycle.max_med_per_cycle, 3);
        assert_eq!(cfg.quiet_hours.start, 23);
        assert_eq!(cfg.quiet_hours.end, 6);
        assert_eq!(cfg.quiet_hours.exception, QuietHoursException::HighOnly);
        assert_eq!(cfg.timezone_offset_hours, 8);
        assert_eq!(cfg.dispatch.send_delay_ms, 300);
    }

    #[test]
    fn out_of_range_offset_falls_back() {
        let cfg = AppConfig {
            timezone_offset_hours: 99,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(cfg.timezone_offset_hours, 7);
        assert_eq!(cfg.local_offset().local_minus_utc(), 7 * 3600);
    }

    #[test]
    fn id_list_parsing_trims_and_drops_empty() {
        assert_eq!(parse_id_list(" 1, 2,,3 "), vec!["1", "2", "3"]);
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_APP_CONFIG_PATH);
        env::remove_var("ADMIN_USER_IDS");

        // No file anywhere → defaults
        let cfg = AppConfig::load_default().unwrap();
        assert_eq!(cfg.cycle, CycleLimits::default());

        // Env path wins and secrets come from env
        let p = tmp.path().join("custom.toml");
        fs::write(&p, "[cycle]\nmax_med_per_cycle = 1\n").unwrap();
        env::set_var(ENV_APP_CONFIG_PATH, p.display().to_string());
        env::set_var("ADMIN_USER_IDS", "42, 7");
        let cfg = AppConfig::load_default().unwrap();
        assert_eq!(cfg.cycle.max_med_per_cycle, 1);
        assert!(cfg.is_admin("42"));
        assert!(!cfg.is_admin("43"));

        // Dangling env path is an error
        env::set_var(ENV_APP_CONFIG_PATH, tmp.path().join("nope.toml").display().to_string());
        assert!(AppConfig::load_default().is_err());

        env::remove_var(ENV_APP_CONFIG_PATH);
        env::remove_var("ADMIN_USER_IDS");
        env::set_current_dir(&old).unwrap();
    }
}
