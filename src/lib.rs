// src/lib.rs

//! Sitemapper crawl scheduler library.
//!
//! Sites announced on the event bus are queued, admitted into a bounded set of
//! crawl workers and reconciled on a fixed tick. Workers cache every fetched
//! resource on disk and report pages back onto the bus.

pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use error::{AppError, Result};
pub use events::Bus;
pub use models::{Config, Site};
pub use services::{Scheduler, SchedulerHandle};
