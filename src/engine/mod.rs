//! Crawl engine capability set.
//!
//! The scheduler never fetches anything itself. Each admitted site gets one
//! engine built by an [`EngineFactory`]; the engine reports back through an
//! [`EngineListener`] and exposes its queue counts for reconciliation.
//!
//! - `HttpEngine`: same-host crawler over reqwest, used by the CLI
//! - `ManualEngine` (tests only): driven step by step from test code

mod http;
#[cfg(test)]
pub(crate) mod manual;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::CrawlerConfig;

pub use http::{HttpEngine, HttpEngineFactory};

/// Fetched-versus-waiting counts of an engine's internal queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub complete: usize,
    pub queued: usize,
}

/// A finished fetch, successful or not.
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub url: String,
    pub content_type: Option<String>,
    pub http_status: Option<u16>,
    pub body: Vec<u8>,
}

impl FetchedPage {
    /// Whether the MIME type (parameters ignored) is `text/html`.
    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("text/html"))
    }

    pub fn byte_size(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Per-crawl options handed to the factory.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_concurrent: usize,
    pub strip_query: bool,
    pub max_pages: Option<usize>,
    pub max_resource_bytes: u64,
}

impl From<&CrawlerConfig> for EngineOptions {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            timeout: config.timeout(),
            max_concurrent: config.max_concurrent.max(1),
            strip_query: config.strip_query,
            max_pages: config.max_pages,
            max_resource_bytes: config.max_resource_bytes,
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&CrawlerConfig::default())
    }
}

/// Receiver of engine lifecycle callbacks.
#[async_trait]
pub trait EngineListener: Send + Sync {
    /// Called once per finished fetch, including HTTP error statuses.
    async fn on_fetch_complete(&self, page: FetchedPage);

    /// Called once when the engine's queue is exhausted.
    async fn on_crawl_complete(&self);
}

/// One crawl of one site.
pub trait CrawlEngine: Send + Sync {
    /// Begins crawling; callbacks go to `listener` until completion or `stop`.
    fn start(&mut self, listener: Arc<dyn EngineListener>) -> Result<()>;

    /// Current fetched/queued counts.
    fn queue_counts(&self) -> QueueCounts;

    /// Aborts the crawl. No new callbacks start afterwards.
    fn stop(&mut self);
}

/// Builds an engine bound to a crawl root.
pub trait EngineFactory: Send + Sync {
    fn create(&self, host: &str, options: &EngineOptions) -> Result<Box<dyn CrawlEngine>>;
}
