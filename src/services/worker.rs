// src/services/worker.rs

//! Crawl worker service.
//!
//! Binds one site to one crawl engine and one disk cache, and turns engine and
//! cache callbacks into `Pages/crawled` events. Lifecycle events other than
//! `Sites/started` are published from the scheduler's reconcile step through
//! [`CrawlWorker::reconcile`].

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::engine::{
    CrawlEngine, EngineFactory, EngineListener, EngineOptions, FetchedPage, QueueCounts,
};
use crate::error::Result;
use crate::events::{Bus, Channel, Topic};
use crate::models::{PageCrawled, PageStatus, Site, SiteStatus};
use crate::storage::DiskCache;
use crate::utils::html::extract_title;

/// Result of reconciling a worker during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Running,
    Completed,
}

/// State shared between the worker and its engine/cache callbacks.
///
/// Every publish about this site happens while holding the `site` lock, so a
/// page record can never land after `Sites/completed` or `Sites/cancelled`.
struct WorkerState {
    site_id: String,
    site: Mutex<Site>,
    retired: AtomicBool,
    bus: Bus,
    cache: DiskCache,
}

impl WorkerState {
    fn is_finished(&self, site: &Site) -> bool {
        site.is_completed() || self.retired.load(Ordering::SeqCst)
    }

    fn publish_page(&self, page: PageCrawled) {
        let site = self.site.lock();
        if self.is_finished(&site) {
            log::debug!("Dropping page {} for finished site {}", page.url, site.id);
            return;
        }
        self.bus.publish(Channel::Pages, Topic::Crawled, page);
    }

    /// Close the site's lifecycle for good.
    ///
    /// A crawl that completed but was never reconciled still gets its
    /// `Sites/updated` and `Sites/completed`; anything else is cancelled.
    fn retire(&self, counts: QueueCounts) -> Site {
        let mut site = self.site.lock();
        if self.retired.swap(true, Ordering::SeqCst) {
            return site.clone();
        }

        if site.is_completed() {
            site.pages_scanned = counts.complete;
            site.pages_left = counts.queued;
            self.bus
                .publish(Channel::Sites, Topic::Updated, site.clone());
            self.bus
                .publish(Channel::Sites, Topic::Completed, site.clone());
        } else {
            self.bus
                .publish(Channel::Sites, Topic::Cancelled, site.clone());
        }
        site.clone()
    }
}

#[async_trait]
impl EngineListener for WorkerState {
    async fn on_fetch_complete(&self, page: FetchedPage) {
        if self.is_finished(&self.site.lock()) {
            return;
        }

        let title = if page.is_html() {
            extract_title(&page.body)
        } else {
            None
        };
        log::debug!("Fetched {} ({:?}) title={:?}", page.url, page.http_status, title);

        if page.http_status.is_some_and(|s| (200..300).contains(&s)) {
            if let Err(e) = self.cache.store(&page).await {
                log::warn!("Failed to cache {}: {}", page.url, e);
            }
        }

        self.publish_page(PageCrawled {
            url: page.url.clone(),
            site_id: self.site_id.clone(),
            title,
            content_type: page.content_type.clone(),
            http_status: page.http_status,
            byte_size: Some(page.byte_size()),
            status: PageStatus::Unlinked,
            cache_object: None,
        });
    }

    async fn on_crawl_complete(&self) {
        if self.is_finished(&self.site.lock()) {
            return;
        }
        if let Err(e) = self.cache.flush().await {
            log::warn!("Failed to write cache index for {}: {}", self.site_id, e);
        }

        let index = self.cache.index();
        let mut site = self.site.lock();
        if self.retired.load(Ordering::SeqCst) {
            return;
        }
        site.file_index = Some(index);
        site.status = SiteStatus::Completed;
        log::info!("Finished crawling {}", site.host);
    }
}

/// Runtime binding of one site to one engine instance and its cache.
pub struct CrawlWorker {
    state: Arc<WorkerState>,
    engine: Box<dyn CrawlEngine>,
    last_scanned: usize,
    last_progress: Instant,
}

impl CrawlWorker {
    /// Build the worker, publish `Sites/started` and start the engine.
    ///
    /// Fails before anything is published if the site is invalid, its storage
    /// directory cannot be created, or the engine cannot be built.
    pub async fn spawn(
        mut site: Site,
        cache_root: &Path,
        factory: &dyn EngineFactory,
        options: &EngineOptions,
        bus: &Bus,
    ) -> Result<Self> {
        site.validate()?;

        let storage_path = site.storage_path_in(cache_root);
        let cache = DiskCache::open(&storage_path).await?;
        let mut engine = factory.create(&site.host, options)?;

        site.storage_path = Some(storage_path);
        site.status = SiteStatus::Running;

        let state = Arc::new(WorkerState {
            site_id: site.id.clone(),
            site: Mutex::new(site),
            retired: AtomicBool::new(false),
            bus: bus.clone(),
            cache,
        });

        let weak = Arc::downgrade(&state);
        state.cache.on_cached(move |object| {
            if let Some(state) = weak.upgrade() {
                state.publish_page(PageCrawled::cached(state.site_id.clone(), object.clone()));
            }
        });

        {
            let site = state.site.lock();
            state
                .bus
                .publish(Channel::Sites, Topic::Started, site.clone());
        }

        let listener: Arc<dyn EngineListener> = state.clone();
        if let Err(e) = engine.start(listener) {
            state.retire(QueueCounts::default());
            return Err(e);
        }

        Ok(Self {
            state,
            engine,
            last_scanned: 0,
            last_progress: Instant::now(),
        })
    }

    pub fn site_id(&self) -> &str {
        &self.state.site_id
    }

    /// Snapshot of the site record.
    pub fn site(&self) -> Site {
        self.state.site.lock().clone()
    }

    pub fn is_completed(&self) -> bool {
        self.state.site.lock().is_completed()
    }

    /// Refresh counters, publish `Sites/updated`, and `Sites/completed` once
    /// the engine has finished.
    pub fn reconcile(&mut self) -> Reconciled {
        let counts = self.engine.queue_counts();
        let mut site = self.state.site.lock();
        site.pages_scanned = counts.complete;
        site.pages_left = counts.queued;

        if site.pages_scanned != self.last_scanned {
            self.last_scanned = site.pages_scanned;
            self.last_progress = Instant::now();
        }

        log::debug!(
            "Crawler {} has {} items in the queue",
            site.host,
            site.pages_left
        );
        self.state
            .bus
            .publish(Channel::Sites, Topic::Updated, site.clone());

        if site.is_completed() {
            self.state.retired.store(true, Ordering::SeqCst);
            self.state
                .bus
                .publish(Channel::Sites, Topic::Completed, site.clone());
            Reconciled::Completed
        } else {
            Reconciled::Running
        }
    }

    /// Whether the scanned-page count has been flat for at least `timeout`.
    pub fn is_stale(&self, timeout: Duration) -> bool {
        !self.is_completed() && self.last_progress.elapsed() >= timeout
    }

    /// Stop the engine and close the lifecycle.
    ///
    /// Publishes `Sites/cancelled`, or `Sites/updated` + `Sites/completed`
    /// when the engine finished since the last reconcile.
    pub fn retire(mut self) -> Site {
        let counts = self.engine.queue_counts();
        self.engine.stop();
        self.state.retire(counts)
    }
}

impl Drop for CrawlWorker {
    fn drop(&mut self) {
        self.engine.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::engine::manual::{ManualFactory, html_page};
    use crate::error::AppError;
    use crate::events::{Envelope, Route, Tap};

    struct Fixture {
        bus: Bus,
        tap: Tap,
        factory: Arc<ManualFactory>,
        tmp: TempDir,
    }

    fn fixture() -> Fixture {
        let bus = Bus::new();
        let tap = bus.tap(Route::all());
        Fixture {
            bus,
            tap,
            factory: ManualFactory::new(),
            tmp: TempDir::new().unwrap(),
        }
    }

    impl Fixture {
        async fn spawn(&self, site: Site) -> Result<CrawlWorker> {
            CrawlWorker::spawn(
                site,
                self.tmp.path(),
                self.factory.as_ref(),
                &EngineOptions::default(),
                &self.bus,
            )
            .await
        }
    }

    fn pages(events: &[Arc<Envelope>]) -> Vec<PageCrawled> {
        events
            .iter()
            .filter_map(|e| e.payload.as_page().cloned())
            .collect()
    }

    #[tokio::test]
    async fn test_spawn_publishes_started() {
        let mut fx = fixture();
        let worker = fx.spawn(Site::new("s1", "example.com")).await.unwrap();

        assert!(fx.tmp.path().join("s1").is_dir());
        assert!(fx.factory.control("example.com").is_started());

        let events = fx.tap.drain();
        assert_eq!(events.len(), 1);
        assert!(events[0].is(Route::SITE_STARTED));
        let site = events[0].payload.as_site().unwrap();
        assert_eq!(site.status, SiteStatus::Running);
        assert_eq!(site.storage_path, Some(fx.tmp.path().join("s1")));
        assert_eq!(worker.site().status, SiteStatus::Running);
    }

    #[tokio::test]
    async fn test_spawn_rejects_missing_host() {
        let mut fx = fixture();
        let err = fx.spawn(Site::new("s1", "")).await.err().unwrap();

        assert!(err.is_validation());
        assert_eq!(fx.factory.created(), 0);
        assert!(fx.tap.drain().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_reports_storage_failure() {
        let mut fx = fixture();
        std::fs::write(fx.tmp.path().join("s1"), b"not a directory").unwrap();

        let err = fx.spawn(Site::new("s1", "example.com")).await.err().unwrap();
        assert!(matches!(err, AppError::Storage { .. }));
        assert!(fx.tap.drain().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_reports_engine_failure() {
        let mut fx = fixture();
        fx.factory.fail_host("example.com");

        let err = fx.spawn(Site::new("s1", "example.com")).await.err().unwrap();
        assert!(matches!(err, AppError::Engine { .. }));
        assert!(fx.tap.drain().is_empty());
    }

    #[tokio::test]
    async fn test_html_fetch_publishes_unlinked_page_with_title() {
        let mut fx = fixture();
        let _worker = fx.spawn(Site::new("s1", "example.com")).await.unwrap();
        fx.tap.drain();

        let control = fx.factory.control("example.com");
        control
            .fetch(html_page(
                "http://example.com/",
                "<html><head><title>Example Domain</title></head></html>",
            ))
            .await;

        let records = pages(&fx.tap.drain());
        let unlinked: Vec<_> = records
            .iter()
            .filter(|p| p.status == PageStatus::Unlinked)
            .collect();
        assert_eq!(unlinked.len(), 1);
        assert_eq!(unlinked[0].title.as_deref(), Some("Example Domain"));
        assert_eq!(unlinked[0].site_id, "s1");
        assert_eq!(unlinked[0].http_status, Some(200));

        let cached: Vec<_> = records
            .iter()
            .filter(|p| p.status == PageStatus::Cached)
            .collect();
        assert_eq!(cached.len(), 1);
        assert_eq!(
            cached[0].cache_object.as_ref().unwrap().url,
            "http://example.com/"
        );
    }

    #[tokio::test]
    async fn test_page_without_title_has_no_title() {
        let mut fx = fixture();
        let _worker = fx.spawn(Site::new("s1", "example.com")).await.unwrap();
        fx.tap.drain();

        let control = fx.factory.control("example.com");
        control
            .fetch(html_page("http://example.com/a", "<p>no title here</p>"))
            .await;
        control
            .fetch(FetchedPage {
                url: "http://example.com/logo.png".to_string(),
                content_type: Some("image/png".to_string()),
                http_status: Some(200),
                body: vec![0x89, 0x50, 0x4e, 0x47],
            })
            .await;

        let unlinked: Vec<_> = pages(&fx.tap.drain())
            .into_iter()
            .filter(|p| p.status == PageStatus::Unlinked)
            .collect();
        assert_eq!(unlinked.len(), 2);
        assert!(unlinked.iter().all(|p| p.title.is_none()));
    }

    #[tokio::test]
    async fn test_failed_fetch_is_reported_but_not_cached() {
        let mut fx = fixture();
        let _worker = fx.spawn(Site::new("s1", "example.com")).await.unwrap();
        fx.tap.drain();

        fx.factory
            .control("example.com")
            .fetch(FetchedPage {
                url: "http://example.com/missing".to_string(),
                http_status: Some(404),
                ..FetchedPage::default()
            })
            .await;

        let records = pages(&fx.tap.drain());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, PageStatus::Unlinked);
        assert_eq!(records[0].http_status, Some(404));
    }

    #[tokio::test]
    async fn test_completion_is_published_by_reconcile() {
        let mut fx = fixture();
        let mut worker = fx.spawn(Site::new("s1", "example.com")).await.unwrap();
        let control = fx.factory.control("example.com");
        control
            .fetch(html_page("http://example.com/", "<title>Home</title>"))
            .await;
        control.set_counts(1, 0);
        fx.tap.drain();

        control.complete().await;
        assert!(worker.is_completed());
        // Completion itself publishes nothing.
        assert!(fx.tap.drain().is_empty());

        assert_eq!(worker.reconcile(), Reconciled::Completed);
        let events = fx.tap.drain();
        assert_eq!(events.len(), 2);
        assert!(events[0].is(Route::SITE_UPDATED));
        assert!(events[1].is(Route::SITE_COMPLETED));

        let site = events[1].payload.as_site().unwrap();
        assert_eq!(site.pages_scanned, 1);
        assert_eq!(site.file_index.as_ref().unwrap().len(), 1);
        assert!(fx.tmp.path().join("s1").join(DiskCache::INDEX_FILE).is_file());
    }

    #[tokio::test]
    async fn test_no_pages_after_completion() {
        let mut fx = fixture();
        let _worker = fx.spawn(Site::new("s1", "example.com")).await.unwrap();
        let control = fx.factory.control("example.com");
        control.complete().await;
        fx.tap.drain();

        control
            .fetch(html_page("http://example.com/late", "<title>Late</title>"))
            .await;
        assert!(fx.tap.drain().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_refreshes_counters() {
        let mut fx = fixture();
        let mut worker = fx.spawn(Site::new("s1", "example.com")).await.unwrap();
        fx.factory.control("example.com").set_counts(3, 7);
        fx.tap.drain();

        assert_eq!(worker.reconcile(), Reconciled::Running);
        let events = fx.tap.drain();
        assert_eq!(events.len(), 1);
        let site = events[0].payload.as_site().unwrap();
        assert_eq!((site.pages_scanned, site.pages_left), (3, 7));
    }

    #[tokio::test]
    async fn test_retire_stops_engine_and_publishes_cancelled() {
        let mut fx = fixture();
        let worker = fx.spawn(Site::new("s1", "example.com")).await.unwrap();
        let control = fx.factory.control("example.com");
        fx.tap.drain();

        let site = worker.retire();
        assert_eq!(site.id, "s1");
        assert!(control.is_stopped());

        let events = fx.tap.drain();
        assert_eq!(events.len(), 1);
        assert!(events[0].is(Route::SITE_CANCELLED));
    }

    #[tokio::test]
    async fn test_no_pages_after_retire() {
        let mut fx = fixture();
        let worker = fx.spawn(Site::new("s1", "example.com")).await.unwrap();
        let control = fx.factory.control("example.com");
        worker.retire();
        fx.tap.drain();

        control
            .fetch_after_stop(html_page("http://example.com/late", "<title>Late</title>"))
            .await;

        assert!(pages(&fx.tap.drain()).is_empty());
        // The late page is not cached either.
        let entries = std::fs::read_dir(fx.tmp.path().join("s1")).unwrap().count();
        assert_eq!(entries, 0);
    }

    #[tokio::test]
    async fn test_retire_after_unreconciled_completion_publishes_completed() {
        let mut fx = fixture();
        let worker = fx.spawn(Site::new("s1", "example.com")).await.unwrap();
        let control = fx.factory.control("example.com");
        control
            .fetch(html_page("http://example.com/", "<title>Home</title>"))
            .await;
        control.set_counts(1, 0);
        control.complete().await;
        fx.tap.drain();

        let site = worker.retire();
        assert!(site.is_completed());

        let events = fx.tap.drain();
        let routes: Vec<Route> = events.iter().map(|e| e.route()).collect();
        assert_eq!(routes, vec![Route::SITE_UPDATED, Route::SITE_COMPLETED]);
        let completed = events[1].payload.as_site().unwrap();
        assert_eq!(completed.pages_scanned, 1);
        assert_eq!(completed.file_index.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retire_after_reconciled_completion_is_silent() {
        let mut fx = fixture();
        let mut worker = fx.spawn(Site::new("s1", "example.com")).await.unwrap();
        fx.factory.control("example.com").complete().await;
        assert_eq!(worker.reconcile(), Reconciled::Completed);
        fx.tap.drain();

        worker.retire();
        assert!(fx.tap.drain().is_empty());
    }
}
