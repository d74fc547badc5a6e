//! Local filesystem cache bound to one site's storage directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::engine::FetchedPage;
use crate::error::{AppError, Result};
use crate::models::{CacheObject, FileIndex};

type CachedListener = Arc<dyn Fn(&CacheObject) + Send + Sync>;

/// Disk cache for the resources of one crawl.
pub struct DiskCache {
    root: PathBuf,
    index: Mutex<FileIndex>,
    listeners: Mutex<Vec<CachedListener>>,
}

impl DiskCache {
    /// File name of the persisted index.
    pub const INDEX_FILE: &'static str = "index.json";

    /// Open (creating if needed) the cache rooted at `root`.
    ///
    /// An existing `index.json` is loaded so a re-crawl extends it.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| AppError::storage(&root, e))?;

        let index_path = root.join(Self::INDEX_FILE);
        let index = match tokio::fs::read(&index_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                log::warn!("Ignoring unreadable cache index {:?}: {}", index_path, e);
                FileIndex::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileIndex::default(),
            Err(e) => return Err(AppError::storage(&index_path, e)),
        };

        Ok(Self {
            root,
            index: Mutex::new(index),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Register a callback fired after every successful `store`.
    pub fn on_cached(&self, listener: impl Fn(&CacheObject) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Persist a fetched resource and record it in the index.
    pub async fn store(&self, page: &FetchedPage) -> Result<CacheObject> {
        let file_name = format!("{}.cache", hex::encode(Sha256::digest(page.url.as_bytes())));
        let path = PathBuf::from(file_name);
        self.write_bytes(&path, &page.body).await?;

        let object = CacheObject {
            url: page.url.clone(),
            path,
            content_type: page.content_type.clone(),
            byte_size: page.byte_size(),
            checksum: hex::encode(Sha256::digest(&page.body)),
            cached_at: Utc::now(),
        };
        self.index.lock().insert(object.clone());

        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener(&object);
        }

        Ok(object)
    }

    /// Snapshot of the current index.
    pub fn index(&self) -> FileIndex {
        self.index.lock().clone()
    }

    /// Write the index to `index.json`.
    pub async fn flush(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.index())?;
        self.write_bytes(Path::new(Self::INDEX_FILE), &bytes).await
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, relative: &Path, bytes: &[u8]) -> Result<()> {
        let path = self.root.join(relative);
        let tmp = path.with_extension("tmp");

        let write = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            drop(file);
            tokio::fs::rename(&tmp, &path).await?;
            Ok::<(), std::io::Error>(())
        };
        write.await.map_err(|e| AppError::storage(&path, e))
    }
}
