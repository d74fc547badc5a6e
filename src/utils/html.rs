//! HTML inspection helpers.

use scraper::{Html, Selector};
use url::Url;

use crate::utils::url::resolve;

/// Text of the document's `<title>`, whitespace-normalized.
///
/// Returns `None` when there is no title or it is blank.
pub fn extract_title(body: &[u8]) -> Option<String> {
    let document = Html::parse_document(&String::from_utf8_lossy(body));
    let selector = Selector::parse("title").ok()?;
    let raw: String = document.select(&selector).next()?.text().collect();
    let title = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

/// Absolute `http(s)` targets of every `<a href>` in the document.
pub fn extract_links(body: &[u8], base: &Url) -> Vec<Url> {
    let document = Html::parse_document(&String::from_utf8_lossy(body));
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| resolve(base, href))
        .collect()
}
