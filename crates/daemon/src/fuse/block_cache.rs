//! Block cache and read path for file contents
//!
//! Files are served in fixed-size blocks fetched on demand with HTTP range
//! requests. Blocks are kept in insertion order and the oldest are evicted
//! once the resident count exceeds `max_blocks_per_file` times the number of
//! memoized download links.
//!
//! Concurrent misses on the same block share a single in-flight fetch.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::{BoxFuture, FutureExt, Shared};
use moka::sync::Cache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use url::Url;

use common::vfs::path;
use common::{FilesystemIndex, IndexHandle, MetaRecord, RecordKey};

use crate::catalog::{CatalogClient, CatalogError, FetchError, RangeFetcher};

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("no such file: {0}")]
    NotFound(String),

    #[error("failed to resolve download link: {0}")]
    Resolve(#[from] CatalogError),

    #[error("failed to fetch block: {0}")]
    Fetch(Arc<FetchError>),
}

impl From<FetchError> for ReadError {
    fn from(err: FetchError) -> Self {
        ReadError::Fetch(Arc::new(err))
    }
}

/// Configuration for the block cache
#[derive(Debug, Clone)]
pub struct BlockCacheConfig {
    /// Size of one block in bytes
    pub block_size: u64,
    /// Resident block budget per open download link
    pub max_blocks_per_file: usize,
    /// How long a resolved download link is reused
    pub link_ttl: Duration,
}

impl Default for BlockCacheConfig {
    fn default() -> Self {
        Self {
            block_size: 16 * 1024 * 1024,
            max_blocks_per_file: 16,
            link_ttl: Duration::from_secs(3600),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockCacheStats {
    pub resident_blocks: usize,
    pub resident_bytes: u64,
    pub open_links: u64,
    pub pending_fetches: usize,
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BlockKey {
    path: String,
    index: u64,
}

struct CachedBlock {
    data: Bytes,
    /// Record the block was read from
    owner: RecordKey,
    file_size: u64,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Bytes, Arc<FetchError>>>>;

#[derive(Default)]
struct Inner {
    /// Index generation the resident blocks belong to
    generation: u64,
    blocks: HashMap<BlockKey, CachedBlock>,
    /// Insertion order: front is evicted first
    order: VecDeque<BlockKey>,
    pending: HashMap<BlockKey, SharedFetch>,
    resident_bytes: u64,
}

impl Inner {
    fn insert(&mut self, key: BlockKey, block: CachedBlock) {
        if self.blocks.contains_key(&key) {
            return;
        }
        self.resident_bytes += block.data.len() as u64;
        self.order.push_back(key.clone());
        self.blocks.insert(key, block);
    }

    fn evict_to(&mut self, bound: usize) {
        while self.blocks.len() > bound {
            let Some(key) = self.order.pop_front() else {
                break;
            };
            if let Some(block) = self.blocks.remove(&key) {
                self.resident_bytes -= block.data.len() as u64;
                tracing::debug!(path = %key.path, block = key.index, "evicted block");
            }
        }
    }

    /// Keep only blocks whose path still belongs to the same record with
    /// the same size.
    fn retain_valid(&mut self, index: &FilesystemIndex) {
        let before = self.blocks.len();
        self.blocks.retain(|key, block| {
            index
                .get_record(&key.path)
                .is_some_and(|r| r.key() == block.owner && r.file_size == block.file_size)
        });
        let blocks = &self.blocks;
        self.order.retain(|key| blocks.contains_key(key));
        self.resident_bytes = self.blocks.values().map(|b| b.data.len() as u64).sum();

        let dropped = before - self.blocks.len();
        if dropped > 0 {
            tracing::debug!(dropped, "dropped blocks of changed files");
        }
    }
}

/// Resident block budget: per-link budget times the open link count.
fn block_bound(links: &Cache<String, Url>, per_link: usize) -> usize {
    links.run_pending_tasks();
    let open = links.entry_count().max(1) as usize;
    per_link.saturating_mul(open)
}

/// Read-through block cache backed by the remote content provider
pub struct BlockCache {
    index: IndexHandle,
    catalog: Arc<dyn CatalogClient>,
    fetcher: Arc<dyn RangeFetcher>,
    config: BlockCacheConfig,
    /// File path to resolved download URL
    links: Cache<String, Url>,
    inner: Arc<Mutex<Inner>>,
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
}

impl BlockCache {
    pub fn new(
        index: IndexHandle,
        catalog: Arc<dyn CatalogClient>,
        fetcher: Arc<dyn RangeFetcher>,
        config: BlockCacheConfig,
    ) -> Self {
        let links = Cache::builder().time_to_live(config.link_ttl).build();
        let generation = index.load().generation();

        Self {
            index,
            catalog,
            fetcher,
            config,
            links,
            inner: Arc::new(Mutex::new(Inner {
                generation,
                ..Default::default()
            })),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn index(&self) -> &IndexHandle {
        &self.index
    }

    /// Read up to `length` bytes of `path` starting at `offset`.
    ///
    /// Reads past end-of-file are clamped. Any failed block fetch fails the
    /// whole read.
    pub async fn read(&self, path: &str, offset: u64, length: u64) -> Result<Bytes, ReadError> {
        let index = self.index.load();
        let path = path::normalize(path);
        let record = index
            .get_record(&path)
            .ok_or_else(|| ReadError::NotFound(path.clone()))?;

        self.sync_generation(&index);

        let size = record.file_size;
        if length == 0 || offset >= size {
            return Ok(Bytes::new());
        }
        let end = offset.saturating_add(length).min(size);
        let block_size = self.config.block_size;
        let first = offset / block_size;
        let last = (end - 1) / block_size;

        let mut parts = Vec::with_capacity((last - first + 1) as usize);
        for block in first..=last {
            let data = self
                .load_block(&path, record, index.generation(), block)
                .await?;
            let block_start = block * block_size;
            let from = offset.saturating_sub(block_start) as usize;
            let to = ((end - block_start) as usize).min(data.len());
            parts.push(data.slice(from.min(to)..to));
        }

        if parts.len() == 1 {
            return Ok(parts.remove(0));
        }
        let mut out = BytesMut::with_capacity((end - offset) as usize);
        for part in parts {
            out.extend_from_slice(&part);
        }
        Ok(out.freeze())
    }

    /// Invalidate links and stale blocks when a new index has been published.
    fn sync_generation(&self, index: &FilesystemIndex) {
        let mut inner = self.inner.lock();
        // Readers holding an older snapshot never roll the cache back.
        if index.generation() <= inner.generation {
            return;
        }
        tracing::debug!(
            from = inner.generation,
            to = index.generation(),
            "index replaced, invalidating download links"
        );
        inner.generation = index.generation();
        self.links.invalidate_all();
        inner.retain_valid(index);
    }

    async fn link_for(&self, path: &str, record: &MetaRecord) -> Result<Url, ReadError> {
        if let Some(url) = self.links.get(path) {
            return Ok(url);
        }
        let url = self
            .catalog
            .resolve_download_url(record.category, record.item_id, record.file_id)
            .await?;
        tracing::debug!(%path, "resolved download link");
        self.links.insert(path.to_string(), url.clone());
        Ok(url)
    }

    async fn load_block(
        &self,
        path: &str,
        record: &MetaRecord,
        generation: u64,
        block: u64,
    ) -> Result<Bytes, ReadError> {
        let key = BlockKey {
            path: path.to_string(),
            index: block,
        };

        let pending = {
            let inner = self.inner.lock();
            if let Some(cached) = inner.blocks.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(cached.data.clone());
            }
            inner.pending.get(&key).cloned()
        };
        self.misses.fetch_add(1, Ordering::Relaxed);

        if let Some(shared) = pending {
            return shared.await.map_err(ReadError::Fetch);
        }

        let url = self.link_for(path, record).await?;

        let shared = {
            let mut inner = self.inner.lock();
            if let Some(cached) = inner.blocks.get(&key) {
                return Ok(cached.data.clone());
            }
            match inner.pending.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    // Registered under the lock the task's cleanup takes.
                    let fetch = self.spawn_fetch(key.clone(), url, record, generation);
                    inner.pending.insert(key, fetch.clone());
                    fetch
                }
            }
        };
        shared.await.map_err(ReadError::Fetch)
    }

    /// Fetch one block on its own task. The task outlives any single reader
    /// and clears its pending entry when done.
    fn spawn_fetch(
        &self,
        key: BlockKey,
        url: Url,
        record: &MetaRecord,
        generation: u64,
    ) -> SharedFetch {
        let block_start = key.index * self.config.block_size;
        let block_len = self
            .config
            .block_size
            .min(record.file_size - block_start);
        let owner = record.key();
        let file_size = record.file_size;
        let per_link = self.config.max_blocks_per_file;
        let fetcher = self.fetcher.clone();
        let inner = self.inner.clone();
        let links = self.links.clone();

        self.fetches.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(path = %key.path, block = key.index, block_start, block_len, "fetching block");

        let task = tokio::spawn(async move {
            let result = match fetcher.fetch_range(&url, block_start, block_len).await {
                Ok(data) if (data.len() as u64) < block_len => {
                    Err(Arc::new(FetchError::ShortBody {
                        offset: block_start,
                        expected: block_len,
                        got: data.len() as u64,
                    }))
                }
                Ok(data) => Ok(data),
                Err(err) => Err(Arc::new(err)),
            };

            let mut inner = inner.lock();
            inner.pending.remove(&key);
            match &result {
                Ok(data) if inner.generation == generation => {
                    inner.insert(
                        key,
                        CachedBlock {
                            data: data.clone(),
                            owner,
                            file_size,
                        },
                    );
                    inner.evict_to(block_bound(&links, per_link));
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(path = %key.path, block = key.index, "block fetch failed: {}", err)
                }
            }
            result
        });

        async move {
            task.await
                .unwrap_or_else(|err| Err(Arc::new(FetchError::Interrupted(err.to_string()))))
        }
        .boxed()
        .shared()
    }

    pub fn stats(&self) -> BlockCacheStats {
        self.links.run_pending_tasks();
        let inner = self.inner.lock();
        BlockCacheStats {
            resident_blocks: inner.blocks.len(),
            resident_bytes: inner.resident_bytes,
            open_links: self.links.entry_count(),
            pending_fetches: inner.pending.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            generation: inner.generation,
        }
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
