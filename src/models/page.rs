//! Page records published on the `Pages` channel and the cache index.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One resource persisted by a site's disk cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheObject {
    pub url: String,

    /// File path relative to the site's storage directory
    pub path: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    pub byte_size: u64,

    /// Hex SHA-256 of the stored body
    pub checksum: String,

    pub cached_at: DateTime<Utc>,
}

/// Index of everything a site's cache holds, keyed by URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndex {
    #[serde(default)]
    pub entries: BTreeMap<String, CacheObject>,
}

impl FileIndex {
    pub fn insert(&mut self, object: CacheObject) {
        self.entries.insert(object.url.clone(), object);
    }

    pub fn get(&self, url: &str) -> Option<&CacheObject> {
        self.entries.get(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Linking state of a page record as seen by the archive sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// Fetch record not yet cross-referenced into any index
    Unlinked,
    /// Cache-write record carrying a `cacheObject`
    Cached,
}

/// Payload of `Pages/crawled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageCrawled {
    pub url: String,
    pub site_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_size: Option<u64>,

    pub status: PageStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_object: Option<CacheObject>,
}

impl PageCrawled {
    /// Record for a cache write.
    pub fn cached(site_id: impl Into<String>, object: CacheObject) -> Self {
        Self {
            url: object.url.clone(),
            site_id: site_id.into(),
            title: None,
            content_type: None,
            http_status: None,
            byte_size: None,
            status: PageStatus::Cached,
            cache_object: Some(object),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_record_wire_format() {
        let page = PageCrawled {
            url: "http://example.com/".to_string(),
            site_id: "s1".to_string(),
            title: Some("Home".to_string()),
            content_type: Some("text/html".to_string()),
            http_status: Some(200),
            byte_size: Some(42),
            status: PageStatus::Unlinked,
            cache_object: None,
        };

        let value = serde_json::to_value(&page).unwrap();
        assert_eq!(value["siteId"], "s1");
        assert_eq!(value["status"], "unlinked");
        assert_eq!(value["httpStatus"], 200);
        assert!(value.get("cacheObject").is_none());
    }
}
