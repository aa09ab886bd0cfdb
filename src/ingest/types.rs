// src/ingest/types.rs
use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::SourceConfig;

/// One feed item as parsed, before normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawArticle {
    pub title: String,
    pub link: Option<String>,
    /// Publish date string as found in the feed.
    pub pub_date: Option<String>,
    pub description: Option<String>,
}

#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    fn source(&self) -> &SourceConfig;
    async fn fetch_latest(&self) -> Result<Vec<RawArticle>>;
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchStatus {
    Ok { items: usize },
    CircuitOpen,
    TimedOut,
    Failed { error: String },
}

/// Result of fetching one source in a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct FetchOutcome {
    #[serde(flatten)]
    pub source: SourceConfig,
    #[serde(flatten)]
    pub status: FetchStatus,
    #[serde(skip)]
    pub items: Vec<RawArticle>,
}

impl FetchOutcome {
    pub fn new(source: SourceConfig, status: FetchStatus) -> Self {
        Self {
            source,
            status,
            items: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, FetchStatus::Ok { .. })
    }
}
