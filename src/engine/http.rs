//! Same-host HTTP crawl engine.
//!
//! Breadth-first from the crawl root, following `<a href>` links that stay on
//! the root's host. URL identity drops fragments and, unless disabled, query
//! strings. At most `max_concurrent` fetches are in flight at once, and
//! resources over `max_resource_bytes` are dropped like transport failures.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::engine::{CrawlEngine, EngineFactory, EngineListener, EngineOptions, QueueCounts};
use crate::error::{AppError, Result};
use crate::utils::html::extract_links;
use crate::utils::http::{create_client, fetch_page};
use crate::utils::url::{canonicalize, crawl_root, same_host};

/// Builds one [`HttpEngine`] per site.
#[derive(Debug, Default, Clone)]
pub struct HttpEngineFactory;

impl EngineFactory for HttpEngineFactory {
    fn create(&self, host: &str, options: &EngineOptions) -> Result<Box<dyn CrawlEngine>> {
        let root = crawl_root(host)?;
        let client = create_client(options)?;
        Ok(Box::new(HttpEngine::with_client(root, client, options.clone())))
    }
}

#[derive(Debug, Default)]
struct Counters {
    complete: AtomicUsize,
    queued: AtomicUsize,
}

/// Crawl engine backed by reqwest.
pub struct HttpEngine {
    root: Url,
    client: reqwest::Client,
    options: EngineOptions,
    counters: Arc<Counters>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HttpEngine {
    /// Create an engine with a pre-built HTTP client.
    pub fn with_client(root: Url, client: reqwest::Client, options: EngineOptions) -> Self {
        Self {
            root,
            client,
            options,
            counters: Arc::new(Counters::default()),
            token: CancellationToken::new(),
            task: None,
        }
    }
}

impl CrawlEngine for HttpEngine {
    fn start(&mut self, listener: Arc<dyn EngineListener>) -> Result<()> {
        if self.task.is_some() {
            return Err(AppError::engine(self.root.as_str(), "engine already started"));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AppError::engine(self.root.as_str(), e))?;

        let crawl = Crawl {
            root: self.root.clone(),
            client: self.client.clone(),
            options: self.options.clone(),
            counters: Arc::clone(&self.counters),
            token: self.token.clone(),
        };
        self.task = Some(runtime.spawn(crawl.run(listener)));
        Ok(())
    }

    fn queue_counts(&self) -> QueueCounts {
        QueueCounts {
            complete: self.counters.complete.load(Ordering::Relaxed),
            queued: self.counters.queued.load(Ordering::Relaxed),
        }
    }

    fn stop(&mut self) {
        self.token.cancel();
    }
}

impl Drop for HttpEngine {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct Crawl {
    root: Url,
    client: reqwest::Client,
    options: EngineOptions,
    counters: Arc<Counters>,
    token: CancellationToken,
}

impl Crawl {
    async fn run(self, listener: Arc<dyn EngineListener>) {
        let strip_query = self.options.strip_query;
        let max_in_flight = self.options.max_concurrent.max(1);

        let start = canonicalize(&self.root, strip_query);
        let mut seen = HashSet::from([start.to_string()]);
        let mut frontier = VecDeque::from([start]);
        let mut in_flight = FuturesUnordered::new();
        let mut dispatched = 0usize;

        log::debug!("Crawl of {} started", self.root);

        loop {
            while in_flight.len() < max_in_flight {
                if self.options.max_pages.is_some_and(|max| dispatched >= max) {
                    break;
                }
                let Some(url) = frontier.pop_front() else {
                    break;
                };
                dispatched += 1;
                let client = self.client.clone();
                let max_bytes = self.options.max_resource_bytes;
                in_flight.push(async move {
                    let result = fetch_page(&client, url.as_str(), max_bytes).await;
                    (url, result)
                });
            }
            self.set_queued(frontier.len() + in_flight.len());

            if in_flight.is_empty() {
                break;
            }

            let next = tokio::select! {
                _ = self.token.cancelled() => return,
                next = in_flight.next() => next,
            };
            let Some((url, result)) = next else {
                break;
            };
            self.counters.complete.fetch_add(1, Ordering::Relaxed);

            match result {
                Ok(page) => {
                    if page.is_html() {
                        for link in extract_links(&page.body, &url) {
                            if !same_host(&link, &self.root) {
                                continue;
                            }
                            let link = canonicalize(&link, strip_query);
                            if seen.insert(link.to_string()) {
                                frontier.push_back(link);
                            }
                        }
                    }
                    self.set_queued(frontier.len() + in_flight.len());

                    if self.token.is_cancelled() {
                        return;
                    }
                    listener.on_fetch_complete(page).await;
                }
                Err(e) => log::debug!("Fetch failed for {}: {}", url, e),
            }
        }

        if self.token.is_cancelled() {
            return;
        }
        self.set_queued(0);
        log::debug!(
            "Crawl of {} finished after {} fetches",
            self.root,
            self.counters.complete.load(Ordering::Relaxed)
        );
        listener.on_crawl_complete().await;
    }

    fn set_queued(&self, queued: usize) {
        self.counters.queued.store(queued, Ordering::Relaxed);
    }
}
