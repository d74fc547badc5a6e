// src/utils/url.rs

//! URL manipulation utilities.

use url::Url;

use crate::error::Result;

/// Parse a crawl root given as a URL or a bare hostname.
///
/// # Examples
/// ```
/// use sitemapper::utils::url::crawl_root;
///
/// assert_eq!(crawl_root("example.com").unwrap().as_str(), "http://example.com/");
/// ```
pub fn crawl_root(host: &str) -> Result<Url> {
    let host = host.trim();
    if host.contains("://") {
        Ok(Url::parse(host)?)
    } else {
        Ok(Url::parse(&format!("http://{host}"))?)
    }
}

/// Canonical identity of a URL inside one crawl.
///
/// The fragment is always dropped; the query string only when `strip_query`.
pub fn canonicalize(url: &Url, strip_query: bool) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    if strip_query {
        url.set_query(None);
    }
    url
}

/// Resolve a potentially relative link against the page it appeared on.
///
/// Only `http`/`https` targets are returned.
pub fn resolve(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let url = base.join(href).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Whether two URLs point at the same host (case-insensitive).
pub fn same_host(a: &Url, b: &Url) -> bool {
    match (a.host_str(), b.host_str()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

/// Derive a directory-safe site id from a host.
pub fn site_id_for(host: &str) -> String {
    let host = host.trim();
    let host = host.split_once("://").map_or(host, |(_, rest)| rest);
    let id: String = host
        .trim_end_matches('/')
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    id.trim_matches('.').to_string()
}
