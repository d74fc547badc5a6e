//! Step-by-step engine for tests.
//!
//! The factory hands out one [`ManualControl`] per host; tests use it to
//! deliver fetches, fire completion and set queue counts at exactly the
//! moments they want.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::engine::{
    CrawlEngine, EngineFactory, EngineListener, EngineOptions, FetchedPage, QueueCounts,
};
use crate::error::{AppError, Result};

#[derive(Default)]
pub(crate) struct ManualFactory {
    controls: Mutex<HashMap<String, ManualControl>>,
    failing: Mutex<HashSet<String>>,
    created: AtomicUsize,
}

impl ManualFactory {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `create` fail for this host.
    pub(crate) fn fail_host(&self, host: &str) {
        self.failing.lock().insert(host.to_string());
    }

    /// Control of the most recent engine built for `host`.
    pub(crate) fn control(&self, host: &str) -> ManualControl {
        self.controls
            .lock()
            .get(host)
            .cloned()
            .unwrap_or_else(|| panic!("no engine created for {host}"))
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl EngineFactory for ManualFactory {
    fn create(&self, host: &str, _options: &EngineOptions) -> Result<Box<dyn CrawlEngine>> {
        if self.failing.lock().contains(host) {
            return Err(AppError::engine(host, "refused by test factory"));
        }
        let control = ManualControl::default();
        self.controls
            .lock()
            .insert(host.to_string(), control.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ManualEngine { control }))
    }
}

#[derive(Default)]
struct Shared {
    listener: Mutex<Option<Arc<dyn EngineListener>>>,
    counts: Mutex<QueueCounts>,
    stopped: AtomicBool,
}

#[derive(Clone, Default)]
pub(crate) struct ManualControl {
    shared: Arc<Shared>,
}

impl ManualControl {
    fn listener(&self) -> Option<Arc<dyn EngineListener>> {
        if self.is_stopped() {
            return None;
        }
        self.shared.listener.lock().clone()
    }

    /// Deliver a fetch-complete callback.
    pub(crate) async fn fetch(&self, page: FetchedPage) {
        if let Some(listener) = self.listener() {
            listener.on_fetch_complete(page).await;
        }
    }

    /// Deliver a fetch-complete callback even after `stop`, the way an
    /// in-flight fetch can still land on a real engine.
    pub(crate) async fn fetch_after_stop(&self, page: FetchedPage) {
        let listener = self.shared.listener.lock().clone();
        if let Some(listener) = listener {
            listener.on_fetch_complete(page).await;
        }
    }

    /// Deliver the crawl-complete callback.
    pub(crate) async fn complete(&self) {
        if let Some(listener) = self.listener() {
            listener.on_crawl_complete().await;
        }
    }

    pub(crate) fn set_counts(&self, complete: usize, queued: usize) {
        *self.shared.counts.lock() = QueueCounts { complete, queued };
    }

    pub(crate) fn is_started(&self) -> bool {
        self.shared.listener.lock().is_some()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }
}

pub(crate) struct ManualEngine {
    control: ManualControl,
}

impl CrawlEngine for ManualEngine {
    fn start(&mut self, listener: Arc<dyn EngineListener>) -> Result<()> {
        *self.control.shared.listener.lock() = Some(listener);
        Ok(())
    }

    fn queue_counts(&self) -> QueueCounts {
        *self.control.shared.counts.lock()
    }

    fn stop(&mut self) {
        self.control.shared.stopped.store(true, Ordering::SeqCst);
    }
}

/// An HTML page with status 200.
pub(crate) fn html_page(url: &str, body: &str) -> FetchedPage {
    FetchedPage {
        url: url.to_string(),
        content_type: Some("text/html; charset=utf-8".to_string()),
        http_status: Some(200),
        body: body.as_bytes().to_vec(),
    }
}
