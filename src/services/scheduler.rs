// src/services/scheduler.rs

//! Crawl scheduler service.
//!
//! Keeps the queue of pending sites ordered by creation time, admits them into
//! a bounded set of active [`CrawlWorker`]s and, every tick, reconciles the
//! workers' progress into `Sites/updated` and `Sites/completed` events.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::engine::{EngineFactory, EngineOptions};
use crate::error::{AppError, Result};
use crate::events::{Bus, Route, Tap};
use crate::models::{AdmissionPolicy, Config, SchedulerConfig, Site, SiteStatus};
use crate::services::worker::{CrawlWorker, Reconciled};

/// What a single tick did, by site id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub completed: Vec<String>,
    pub stalled: Vec<String>,
    pub admitted: Vec<String>,
    pub failed: Vec<String>,
}

/// Point-in-time view of the queue and the active workers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerSnapshot {
    pub pending: Vec<Site>,
    pub active: Vec<Site>,
}

impl SchedulerSnapshot {
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }
}

enum Command {
    Cancel {
        site_id: String,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<SchedulerSnapshot>,
    },
}

/// Handle for talking to a scheduler running in the background.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
}

impl SchedulerHandle {
    /// Cancel a pending or active site. Returns whether it was known.
    pub async fn cancel(&self, site_id: impl Into<String>) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Cancel {
            site_id: site_id.into(),
            reply,
        };
        self.tx
            .send(command)
            .await
            .map_err(|_| AppError::closed("scheduler"))?;
        rx.await.map_err(|_| AppError::closed("scheduler"))
    }

    pub async fn snapshot(&self) -> Result<SchedulerSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| AppError::closed("scheduler"))?;
        rx.await.map_err(|_| AppError::closed("scheduler"))
    }
}

/// Queue, admission guard and reconcile loop.
pub struct Scheduler {
    config: SchedulerConfig,
    cache_root: PathBuf,
    engine_options: EngineOptions,
    factory: Arc<dyn EngineFactory>,
    bus: Bus,
    added: Tap,
    pending: VecDeque<Site>,
    active: Vec<CrawlWorker>,
}

impl Scheduler {
    /// Create a scheduler listening for `Sites/added` on `bus`.
    pub fn new(config: &Config, bus: Bus, factory: Arc<dyn EngineFactory>) -> Self {
        let mut scheduler_config = config.scheduler.clone();
        scheduler_config.concurrency_limit = scheduler_config.concurrency_limit.max(1);

        Self {
            config: scheduler_config,
            cache_root: config.cache.root.clone(),
            engine_options: EngineOptions::from(&config.crawler),
            factory,
            added: bus.tap([Route::SITE_ADDED]),
            bus,
            pending: VecDeque::new(),
            active: Vec::new(),
        }
    }

    /// Enqueue a site unless it is completed, already queued or being crawled.
    pub fn on_site_added(&mut self, mut site: Site) -> bool {
        if site.is_completed() {
            log::info!("Did not add {}: already crawled", site.host);
            return false;
        }
        if self.is_known(&site.id) {
            log::info!(
                "Did not add {}: site {} is already queued or crawling",
                site.host,
                site.id
            );
            return false;
        }

        site.status = SiteStatus::Queued;
        let at = self
            .pending
            .partition_point(|queued| queued.created_at <= site.created_at);
        log::info!("{} pushed into crawling queue", site.host);
        self.pending.insert(at, site);
        true
    }

    /// Move `Sites/added` events already delivered by the bus into the queue.
    pub fn poll_added(&mut self) -> usize {
        let mut accepted = 0;
        while let Some(envelope) = self.added.try_recv() {
            if let Some(site) = envelope.payload.as_site() {
                if self.on_site_added(site.clone()) {
                    accepted += 1;
                }
            }
        }
        accepted
    }

    /// One scheduling step: reconcile active workers, then admit from the queue.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        self.poll_added();
        self.reconcile(&mut report);
        self.admit(&mut report).await;
        report
    }

    fn reconcile(&mut self, report: &mut TickReport) {
        let stale_after = self.config.stale_after();

        for mut worker in std::mem::take(&mut self.active) {
            match worker.reconcile() {
                Reconciled::Completed => {
                    log::info!("Site {} completed", worker.site_id());
                    report.completed.push(worker.site_id().to_string());
                }
                Reconciled::Running if stale_after.is_some_and(|t| worker.is_stale(t)) => {
                    log::warn!("Site {} made no progress, stopping crawl", worker.site_id());
                    report.stalled.push(worker.site_id().to_string());
                    worker.retire();
                }
                Reconciled::Running => self.active.push(worker),
            }
        }
    }

    async fn admit(&mut self, report: &mut TickReport) {
        if self.pending.is_empty() {
            log::debug!("No new sites to crawl");
            return;
        }

        let limit = self.config.concurrency_limit;
        let free = limit.saturating_sub(self.active.len());
        if free == 0 {
            log::warn!("At crawl limit ({}), {} site(s) waiting", limit, self.pending.len());
            return;
        }

        let budget = match self.config.admission {
            AdmissionPolicy::OnePerTick => 1,
            AdmissionPolicy::FillCapacity => free,
        };

        for _ in 0..budget {
            let Some(site) = self.pending.pop_front() else {
                break;
            };
            let id = site.id.clone();
            let host = site.host.clone();

            match CrawlWorker::spawn(
                site,
                &self.cache_root,
                self.factory.as_ref(),
                &self.engine_options,
                &self.bus,
            )
            .await
            {
                Ok(worker) => {
                    log::info!("Started crawling {} ({})", host, id);
                    report.admitted.push(id);
                    self.active.push(worker);
                }
                Err(e) => {
                    log::error!("Could not start crawl of site {}: {}", id, e);
                    report.failed.push(id);
                }
            }
        }
    }

    /// Drop a pending site, or stop an active one and close its lifecycle.
    pub fn cancel(&mut self, site_id: &str) -> bool {
        if let Some(pos) = self.pending.iter().position(|s| s.id == site_id) {
            self.pending.remove(pos);
            log::info!("Removed site {} from crawling queue", site_id);
            return true;
        }
        if let Some(pos) = self.active.iter().position(|w| w.site_id() == site_id) {
            let worker = self.active.remove(pos);
            worker.retire();
            log::info!("Cancelled crawl of site {}", site_id);
            return true;
        }
        false
    }

    fn is_known(&self, site_id: &str) -> bool {
        self.pending.iter().any(|s| s.id == site_id)
            || self.active.iter().any(|w| w.site_id() == site_id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.pending.iter().map(|s| s.id.clone()).collect()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.active.iter().map(|w| w.site_id().to_string()).collect()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            pending: self.pending.iter().cloned().collect(),
            active: self.active.iter().map(CrawlWorker::site).collect(),
        }
    }

    /// Run the scheduler loop in the background until `token` is cancelled.
    pub fn spawn(self, token: CancellationToken) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(self.run(rx, token));
        (SchedulerHandle { tx }, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        log::info!(
            "Scheduler running (limit {}, tick {:?})",
            self.config.concurrency_limit,
            self.config.tick_interval()
        );

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => break,

                Some(envelope) = self.added.recv() => {
                    if let Some(site) = envelope.payload.as_site() {
                        self.on_site_added(site.clone());
                    }
                }
                Some(command) = commands.recv() => self.handle_command(command),
                _ = interval.tick() => {
                    let report = self.tick().await;
                    if report != TickReport::default() {
                        log::debug!("Tick: {:?}", report);
                    }
                }
            }
        }

        self.shutdown();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Cancel { site_id, reply } => {
                let _ = reply.send(self.cancel(&site_id));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn shutdown(&mut self) {
        let active = std::mem::take(&mut self.active);
        if !active.is_empty() {
            log::info!("Stopping {} active crawl(s)", active.len());
        }
        for worker in active {
            worker.retire();
        }
    }
}
