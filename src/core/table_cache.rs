//! In-memory cache of decoded reference tables
//!
//! Tables are shared as `Arc`s and never mutated in place: a write to a
//! category invalidates its entry, and the next reader decodes a fresh copy.
//! Concurrent readers therefore see either the old or the new table.

use crate::core::reference_table::ReferenceTable;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Default number of categories whose tables are kept decoded
pub const DEFAULT_TABLE_CACHE_CAPACITY: usize = 256;

/// Storage for decoded reference tables, keyed by category
pub trait TableCache: Send + Sync {
    fn get(&self, category: u8) -> Option<Arc<ReferenceTable>>;

    fn insert(&self, category: u8, table: Arc<ReferenceTable>);

    /// Drop the cached table for `category`
    fn invalidate(&self, category: u8);

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// LRU-bounded table cache
pub struct LruTableCache {
    cache: Mutex<LruCache<u8, Arc<ReferenceTable>>>,
}

impl LruTableCache {
    /// Create a new table cache with given capacity (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        LruTableCache {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl Default for LruTableCache {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_CACHE_CAPACITY)
    }
}

impl TableCache for LruTableCache {
    fn get(&self, category: u8) -> Option<Arc<ReferenceTable>> {
        self.cache.lock().get(&category).cloned()
    }

    fn insert(&self, category: u8, table: Arc<ReferenceTable>) {
        self.cache.lock().put(category, table);
    }

    fn invalidate(&self, category: u8) {
        self.cache.lock().pop(&category);
    }

    fn clear(&self) {
        self.cache.lock().clear();
    }

    fn len(&self) -> usize {
        self.cache.lock().len()
    }
}
