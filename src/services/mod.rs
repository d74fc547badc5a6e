//! Service layer for the crawl scheduler.
//!
//! This module contains the business logic for:
//! - Queueing, admission and reconciliation (`Scheduler`)
//! - Binding one site to an engine and its cache (`CrawlWorker`)

mod scheduler;
mod worker;

pub use scheduler::{Scheduler, SchedulerHandle, SchedulerSnapshot, TickReport};
pub use worker::{CrawlWorker, Reconciled};
