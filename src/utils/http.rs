// src/utils/http.rs

//! HTTP client utilities.

use crate::engine::{EngineOptions, FetchedPage};
use crate::error::{AppError, Result};

/// Create a configured asynchronous HTTP client for one crawl.
pub fn create_client(options: &EngineOptions) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&options.user_agent)
        .timeout(options.timeout)
        .build()?;
    Ok(client)
}

/// Fetch a URL and capture status, content type and body.
///
/// Non-success statuses are returned as pages. Transport failures and bodies
/// larger than `max_bytes` are errors.
pub async fn fetch_page(
    client: &reqwest::Client,
    url: &str,
    max_bytes: u64,
) -> Result<FetchedPage> {
    let mut response = client.get(url).send().await?;
    let http_status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if response.content_length().is_some_and(|len| len > max_bytes) {
        return Err(too_large(url, max_bytes));
    }
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if (body.len() + chunk.len()) as u64 > max_bytes {
            return Err(too_large(url, max_bytes));
        }
        body.extend_from_slice(&chunk);
    }

    Ok(FetchedPage {
        url: url.to_string(),
        content_type,
        http_status: Some(http_status),
        body,
    })
}

fn too_large(url: &str, max_bytes: u64) -> AppError {
    AppError::engine(url, format!("resource exceeds {max_bytes} bytes"))
}
