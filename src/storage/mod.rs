//! Per-site disk cache.
//!
//! ## Directory Structure
//!
//! ```text
//! {cache-root}/
//! └── {site-id}/
//!     ├── index.json        # FileIndex, written when the crawl completes
//!     ├── 3f1c...9a.cache   # One file per cached URL (SHA-256 of the URL)
//!     └── ...
//! ```

pub mod cache;

// Re-export for convenience
pub use cache::DiskCache;
