// src/models/mod.rs

//! Domain models for the crawl scheduler.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod page;
mod site;

// Re-export all public types
pub use config::{AdmissionPolicy, CacheConfig, Config, CrawlerConfig, SchedulerConfig};
pub use page::{CacheObject, FileIndex, PageCrawled, PageStatus};
pub use site::{Site, SiteStatus};
