//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Queue admission and reconciliation settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Per-site disk cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Settings handed to each crawl engine
    #[serde(default)]
    pub crawler: CrawlerConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.concurrency_limit == 0 {
            return Err(AppError::validation(
                "scheduler.concurrency_limit must be >= 1",
            ));
        }
        if self.scheduler.tick_interval_secs == 0 {
            return Err(AppError::validation(
                "scheduler.tick_interval_secs must be > 0",
            ));
        }
        if self.scheduler.stale_after_secs == Some(0) {
            return Err(AppError::validation(
                "scheduler.stale_after_secs must be > 0 when set",
            ));
        }
        if self.cache.root.as_os_str().is_empty() {
            return Err(AppError::validation("cache.root is empty"));
        }
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::validation("crawler.max_concurrent must be > 0"));
        }
        if self.crawler.max_resource_bytes == 0 {
            return Err(AppError::validation(
                "crawler.max_resource_bytes must be > 0",
            ));
        }
        Ok(())
    }
}

/// How many queued sites a single tick may admit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// At most one new worker per tick, even with several free slots
    #[default]
    OnePerTick,
    /// As many workers as there are free slots
    FillCapacity,
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of simultaneously active crawl workers
    #[serde(default = "defaults::concurrency_limit")]
    pub concurrency_limit: usize,

    /// Seconds between reconcile/admit ticks
    #[serde(default = "defaults::tick_interval")]
    pub tick_interval_secs: u64,

    #[serde(default)]
    pub admission: AdmissionPolicy,

    /// Stop workers whose scanned-page count has not moved for this long
    #[serde(default)]
    pub stale_after_secs: Option<u64>,
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_secs.map(Duration::from_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: defaults::concurrency_limit(),
            tick_interval_secs: defaults::tick_interval(),
            admission: AdmissionPolicy::default(),
            stale_after_secs: None,
        }
    }
}

/// Disk cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding one sub-directory per site
    #[serde(default = "defaults::cache_root")]
    pub root: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: defaults::cache_root(),
        }
    }
}

/// HTTP and crawling behavior settings for a single site crawl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-fetch timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Maximum concurrent fetches inside one crawl
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Drop query strings when deciding URL identity
    #[serde(default = "defaults::strip_query")]
    pub strip_query: bool,

    /// Stop a site crawl after this many fetched pages
    #[serde(default)]
    pub max_pages: Option<usize>,

    /// Resources with a larger body are dropped instead of fetched into memory
    #[serde(default = "defaults::max_resource_bytes")]
    pub max_resource_bytes: u64,
}

impl CrawlerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_concurrent: defaults::max_concurrent(),
            strip_query: defaults::strip_query(),
            max_pages: None,
            max_resource_bytes: defaults::max_resource_bytes(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    // Scheduler defaults
    pub fn concurrency_limit() -> usize {
        5
    }
    pub fn tick_interval() -> u64 {
        5
    }

    // Cache defaults
    pub fn cache_root() -> PathBuf {
        PathBuf::from("cached_sites")
    }

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; sitemapper/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_concurrent() -> usize {
        5
    }
    pub fn strip_query() -> bool {
        true
    }
    pub fn max_resource_bytes() -> u64 {
        16 * 1024 * 1024
    }
}
