// src/models/site.rs

//! Site record and its crawl lifecycle status.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::FileIndex;

/// Lifecycle status of a site.
///
/// `New` and `Queued` only describe queue membership; the worker drives
/// `Running -> Completed` and `Completed` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    #[default]
    New,
    Queued,
    Running,
    Completed,
}

/// One crawl target and its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    /// Identifier assigned by the discovery source
    #[serde(default)]
    pub id: String,

    /// Crawl root (URL or bare hostname)
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub status: SiteStatus,

    /// Queue ordering key, oldest first
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// `<cache-root>/<id>`, set on admission
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<PathBuf>,

    #[serde(default)]
    pub pages_scanned: usize,

    #[serde(default)]
    pub pages_left: usize,

    /// Cache index, set once crawling completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_index: Option<FileIndex>,
}

impl Site {
    /// Create a new site stamped with the current time.
    pub fn new(id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            status: SiteStatus::New,
            created_at: Utc::now(),
            storage_path: None,
            pages_scanned: 0,
            pages_left: 0,
            file_index: None,
        }
    }

    /// Override the creation timestamp.
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == SiteStatus::Completed
    }

    /// Check the fields a worker needs before it can be built.
    ///
    /// The id doubles as a directory name under the cache root, so it must be
    /// a single path component.
    pub fn validate(&self) -> Result<()> {
        let id = self.id.as_str();
        if id.trim().is_empty() {
            return Err(AppError::validation("Site id required"));
        }
        if id.trim() != id {
            return Err(AppError::validation(format!(
                "Site id '{}' has surrounding whitespace",
                self.id
            )));
        }
        if id == "." || id == ".." || id.contains(['/', '\\']) {
            return Err(AppError::validation(format!(
                "Site id '{}' is not a valid directory name",
                self.id
            )));
        }
        if self.host.trim().is_empty() {
            return Err(AppError::validation(format!(
                "Target host undefined for site {}",
                self.id
            )));
        }
        Ok(())
    }

    /// Cache directory for this site under the given root.
    pub fn storage_path_in(&self, cache_root: &Path) -> PathBuf {
        cache_root.join(&self.id)
    }
}
