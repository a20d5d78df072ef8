//! Bounded page cache with LRU eviction
//!
//! Holds decoded page rasters keyed by physical index. Capacity is counted
//! in pages; inserting past capacity evicts the least recently used page,
//! which releases its raster as it is dropped.

use crate::page::DecodedPage;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Default number of resident pages
pub const DEFAULT_MAX_CACHED_PAGES: usize = 50;

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of pages currently resident
    pub page_count: usize,

    /// Total bytes of resident rasters
    pub memory_used: usize,

    /// Maximum number of resident pages
    pub capacity: usize,

    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Pages evicted for capacity
    pub evictions: u64,

    /// Pages released for any reason (eviction, overwrite, clear)
    pub releases: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Fraction of capacity in use (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.page_count as f64 / self.capacity as f64
        }
    }
}

/// LRU page cache.
///
/// Not internally synchronized; see [`SharedPageCache`] for the locked form
/// the engine uses.
pub struct PageCache {
    /// Map from physical index to page
    pages: HashMap<u32, DecodedPage>,

    /// LRU queue (most recently used at back, least recently used at front)
    lru_queue: VecDeque<u32>,

    capacity: usize,
    memory_used: usize,
    stats: CacheStats,
}

impl PageCache {
    /// Create a cache holding at most `capacity` pages (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            pages: HashMap::with_capacity(capacity),
            lru_queue: VecDeque::with_capacity(capacity),
            capacity,
            memory_used: 0,
            stats: CacheStats { capacity, ..Default::default() },
        }
    }

    /// Move an index to the back of the LRU queue
    fn touch(&mut self, physical_index: u32) {
        if let Some(position) = self.lru_queue.iter().position(|&k| k == physical_index) {
            self.lru_queue.remove(position);
        }
        self.lru_queue.push_back(physical_index);
    }

    /// Remove the mapping and drop the page, running its release hook.
    fn release(&mut self, physical_index: u32) -> bool {
        match self.pages.remove(&physical_index) {
            Some(page) => {
                self.memory_used = self.memory_used.saturating_sub(page.memory_size());
                self.stats.releases += 1;
                drop(page);
                true
            }
            None => false,
        }
    }

    fn evict_lru(&mut self) -> Option<u32> {
        let oldest = self.lru_queue.pop_front()?;
        if self.release(oldest) {
            self.stats.evictions += 1;
            tracing::trace!(physical_index = oldest, "evicted page");
        }
        Some(oldest)
    }

    fn evict_to_capacity(&mut self) {
        while self.pages.len() > self.capacity {
            if self.evict_lru().is_none() {
                break;
            }
        }
        self.sync_stats();
    }

    fn sync_stats(&mut self) {
        self.stats.page_count = self.pages.len();
        self.stats.memory_used = self.memory_used;
        self.stats.capacity = self.capacity;
    }

    /// Look up a page, promoting it to most recently used on hit.
    pub fn get(&mut self, physical_index: u32) -> Option<&DecodedPage> {
        if self.pages.contains_key(&physical_index) {
            self.touch(physical_index);
            self.stats.hits += 1;
            self.pages.get(&physical_index)
        } else {
            self.stats.misses += 1;
            None
        }
    }

    /// Look up a page without touching LRU order or statistics.
    pub fn peek(&self, physical_index: u32) -> Option<&DecodedPage> {
        self.pages.get(&physical_index)
    }

    pub fn contains(&self, physical_index: u32) -> bool {
        self.pages.contains_key(&physical_index)
    }

    /// Insert a page as most recently used.
    ///
    /// A page already stored at the same index is released first. If the
    /// cache then exceeds capacity, least recently used pages are evicted.
    pub fn put(&mut self, page: DecodedPage) {
        let physical_index = page.physical_index();

        self.release(physical_index);

        self.memory_used += page.memory_size();
        self.pages.insert(physical_index, page);
        self.touch(physical_index);

        self.evict_to_capacity();
    }

    /// Drop one page, running its release hook. Returns `false` if absent.
    pub fn remove(&mut self, physical_index: u32) -> bool {
        if let Some(position) = self.lru_queue.iter().position(|&k| k == physical_index) {
            self.lru_queue.remove(position);
        }
        let removed = self.release(physical_index);
        self.sync_stats();
        removed
    }

    /// Release every resident page.
    pub fn clear(&mut self) {
        let resident: Vec<u32> = self.lru_queue.drain(..).collect();
        for physical_index in resident {
            self.release(physical_index);
        }
        // Pages are always queued; this only guards against a desynced queue.
        let stragglers: Vec<u32> = self.pages.keys().copied().collect();
        for physical_index in stragglers {
            self.release(physical_index);
        }
        self.sync_stats();
    }

    /// Change capacity, evicting immediately when shrinking.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.evict_to_capacity();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn memory_used(&self) -> usize {
        self.memory_used
    }

    /// Resident indices from least to most recently used.
    pub fn resident_indices(&self) -> Vec<u32> {
        self.lru_queue.iter().copied().collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

impl Default for PageCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CACHED_PAGES)
    }
}

/// A [`PageCache`] behind the single mutex that serializes every mutation.
///
/// Readers borrow pages through [`SharedPageCache::with_page`]; the borrow
/// ends with the closure, so nothing outlives the critical section.
#[derive(Clone)]
pub struct SharedPageCache {
    inner: Arc<Mutex<PageCache>>,
}

impl SharedPageCache {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Arc::new(Mutex::new(PageCache::new(capacity))) }
    }

    /// Acquire the cache lock. A poisoned lock is recovered: the cache
    /// structure is never left half-updated by a panicking reader.
    pub fn lock(&self) -> MutexGuard<'_, PageCache> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Render from a resident page, promoting it on hit.
    pub fn with_page<R>(&self, physical_index: u32, f: impl FnOnce(&DecodedPage) -> R) -> Option<R> {
        let mut cache = self.lock();
        cache.get(physical_index).map(f)
    }

    pub fn contains(&self, physical_index: u32) -> bool {
        self.lock().contains(physical_index)
    }

    pub fn put(&self, page: DecodedPage) {
        self.lock().put(page);
    }

    pub fn remove(&self, physical_index: u32) -> bool {
        self.lock().remove(physical_index)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn resident_indices(&self) -> Vec<u32> {
        self.lock().resident_indices()
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats()
    }
}
