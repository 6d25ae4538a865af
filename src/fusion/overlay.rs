//! In-memory cache of resampled overlay slices.
//!
//! After a successful external resample the slice stack is read off disk
//! into per-slice byte buffers and the temp output is deleted; this cache is
//! then the sole source of truth served to the viewer. Entries are keyed by
//! `(primarySeriesId, secondarySeriesId, sopInstanceUID)` and evicted
//! least-recently-used once the configured byte capacity is exceeded.

use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::RwLock;

/// Default cache capacity: 512MB of slice buffers.
pub const DEFAULT_OVERLAY_CACHE_CAPACITY: usize = 512 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead).
const DEFAULT_MAX_ENTRIES: usize = 100_000;

/// Cache key for one overlay slice.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OverlayKey {
    pub primary_series_id: Arc<str>,
    pub secondary_series_id: Arc<str>,
    pub sop_instance_uid: Arc<str>,
}

impl OverlayKey {
    pub fn new(
        primary_series_id: impl Into<Arc<str>>,
        secondary_series_id: impl Into<Arc<str>>,
        sop_instance_uid: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            primary_series_id: primary_series_id.into(),
            secondary_series_id: secondary_series_id.into(),
            sop_instance_uid: sop_instance_uid.into(),
        }
    }
}

/// Size-bounded LRU cache of overlay slice buffers.
///
/// Thread-safe; share across tasks via `Arc`.
pub struct OverlayCache {
    cache: RwLock<LruCache<OverlayKey, Bytes>>,
    max_size: usize,
    current_size: RwLock<usize>,
}

impl OverlayCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_OVERLAY_CACHE_CAPACITY)
    }

    /// Create a cache bounded to `max_size` bytes of slice data.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        Self {
            cache: RwLock::new(LruCache::new(
                std::num::NonZeroUsize::new(max_entries).unwrap(),
            )),
            max_size,
            current_size: RwLock::new(0),
        }
    }

    /// Get a slice buffer, marking it recently used.
    pub async fn get(&self, key: &OverlayKey) -> Option<Bytes> {
        let mut cache = self.cache.write().await;
        cache.get(key).cloned()
    }

    /// Store a slice buffer, evicting least-recently-used entries until the
    /// cache fits its capacity again.
    pub async fn put(&self, key: OverlayKey, data: Bytes) {
        let data_size = data.len();
        let mut cache = self.cache.write().await;
        let mut current_size = self.current_size.write().await;

        if let Some(old) = cache.peek(&key) {
            *current_size = current_size.saturating_sub(old.len());
        }

        cache.put(key, data);
        *current_size += data_size;

        while *current_size > self.max_size {
            if let Some((_, evicted)) = cache.pop_lru() {
                *current_size = current_size.saturating_sub(evicted.len());
            } else {
                break;
            }
        }
    }

    /// Drop every slice of one `(primary, secondary)` pair.
    pub async fn invalidate_pair(&self, primary_series_id: &str, secondary_series_id: &str) {
        self.invalidate_matching(|key| {
            key.primary_series_id.as_ref() == primary_series_id
                && key.secondary_series_id.as_ref() == secondary_series_id
        })
        .await;
    }

    /// Drop every slice belonging to a primary series, across all of its
    /// secondaries. Used when a settings change invalidates the whole
    /// manifest.
    pub async fn invalidate_primary(&self, primary_series_id: &str) {
        self.invalidate_matching(|key| key.primary_series_id.as_ref() == primary_series_id)
            .await;
    }

    async fn invalidate_matching(&self, matches: impl Fn(&OverlayKey) -> bool) {
        let mut cache = self.cache.write().await;
        let mut current_size = self.current_size.write().await;

        let doomed: Vec<OverlayKey> = cache
            .iter()
            .filter(|(key, _)| matches(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            if let Some(data) = cache.pop(&key) {
                *current_size = current_size.saturating_sub(data.len());
            }
        }
    }

    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        let mut current_size = self.current_size.write().await;
        cache.clear();
        *current_size = 0;
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Current total size of cached slices in bytes.
    pub async fn size(&self) -> usize {
        *self.current_size.read().await
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for OverlayCache {
    fn default() -> Self {
        Self::new()
    }
}
