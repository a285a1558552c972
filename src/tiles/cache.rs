use crate::prelude::{Arc, HashMap, Mutex, Weak};
use crate::tiles::key::TileKey;
use crate::tiles::tile::Tile;
use crate::traits::ResourcePool;
use lru::LruCache;
use std::num::NonZeroUsize;

/// Cache handle shared between the render threads and the map view.
///
/// [`TileCache`] itself is not thread-safe: hold the lock across any
/// check-then-act sequence (e.g. `has_tile` followed by `add_tile`).
pub type SharedTileCache = Arc<Mutex<TileCache>>;

/// A cached tile together with the pool its texture came from.
///
/// The back-reference is weak so the cache never keeps the pool alive; if the
/// pool is already gone when the entry is released, the texture is simply
/// dropped.
#[derive(Debug)]
pub struct CacheEntry {
    tile: Tile,
    resources: Weak<dyn ResourcePool>,
}

impl CacheEntry {
    pub fn new(tile: Tile, resources: &Arc<dyn ResourcePool>) -> Self {
        Self {
            tile,
            resources: Arc::downgrade(resources),
        }
    }

    pub fn tile(&self) -> &Tile {
        &self.tile
    }

    /// Take the tile out, detaching it from the pool
    pub fn into_tile(self) -> Tile {
        self.tile
    }

    /// Return the texture to its pool. Returns false if the pool is gone.
    pub fn release(self) -> bool {
        match self.resources.upgrade() {
            Some(pool) => {
                pool.free_render_target(self.tile.render_target);
                true
            }
            None => false,
        }
    }
}

/// Counters describing cache occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub pinned: usize,
    pub evictions: u64,
}

/// Capacity-bounded, recency-ordered store of finished tiles.
///
/// Tiles pinned with [`TileCache::lock_tile`] (typically the ones on screen)
/// are never evicted. Eviction hands textures back to their pool.
#[derive(Debug)]
pub struct TileCache {
    entries: LruCache<TileKey, CacheEntry>,
    pinned: HashMap<TileKey, usize>,
    evictions: u64,
}

impl TileCache {
    /// Create a new tile cache with the given capacity (at least one tile)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            pinned: HashMap::default(),
            evictions: 0,
        }
    }

    /// Wrap a new cache for sharing between threads
    pub fn shared(capacity: usize) -> SharedTileCache {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    /// Check presence without affecting recency
    pub fn has_tile(&self, key: &TileKey) -> bool {
        self.entries.contains(key)
    }

    /// Mark a tile as most recently used
    pub fn touch(&mut self, key: &TileKey) -> bool {
        self.entries.get(key).is_some()
    }

    /// Look up a tile, marking it most recently used
    pub fn get_tile(&mut self, key: &TileKey) -> Option<&Tile> {
        self.entries.get(key).map(CacheEntry::tile)
    }

    /// Look up a tile without affecting recency
    pub fn peek_tile(&self, key: &TileKey) -> Option<&Tile> {
        self.entries.peek(key).map(CacheEntry::tile)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// How many more tiles fit: free slots plus entries that may be evicted
    pub fn can_fit(&self) -> usize {
        let free = self.capacity().saturating_sub(self.len());
        let evictable = self
            .entries
            .iter()
            .filter(|(key, _)| !self.pinned.contains_key(*key))
            .count();
        free + evictable
    }

    /// Grow the cache. Shrinking is refused, since it would drop textures
    /// without returning them.
    pub fn resize(&mut self, capacity: usize) -> bool {
        if capacity < self.capacity() {
            log::warn!(
                "refusing to shrink tile cache from {} to {} elements",
                self.capacity(),
                capacity
            );
            return false;
        }
        if let Some(capacity) = NonZeroUsize::new(capacity) {
            self.entries.resize(capacity);
        }
        true
    }

    /// Insert a tile, evicting least recently used unpinned tiles as needed.
    ///
    /// If the key is already cached the existing tile is kept and touched and
    /// the new entry's texture goes back to its pool.
    pub fn add_tile(&mut self, key: TileKey, entry: CacheEntry) {
        if self.entries.contains(&key) {
            entry.release();
            self.touch(&key);
            return;
        }

        while self.len() >= self.capacity() {
            if !self.evict_one() {
                let grown = self.capacity() + 1;
                log::warn!("all cached tiles are pinned, growing tile cache to {}", grown);
                self.resize(grown);
                break;
            }
        }

        self.entries.put(key, entry);
    }

    fn evict_one(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .rev()
            .map(|(key, _)| *key)
            .find(|key| !self.pinned.contains_key(key));

        match victim.and_then(|key| self.entries.pop(&key).map(|entry| (key, entry))) {
            Some((key, entry)) => {
                log::debug!("evicting tile {}", key);
                entry.release();
                self.evictions += 1;
                true
            }
            None => false,
        }
    }

    /// Pin a cached tile so it cannot be evicted. Pins are counted.
    pub fn lock_tile(&mut self, key: &TileKey) -> bool {
        if !self.entries.contains(key) {
            return false;
        }
        *self.pinned.entry(*key).or_insert(0) += 1;
        true
    }

    pub fn unlock_tile(&mut self, key: &TileKey) {
        if let Some(count) = self.pinned.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.pinned.remove(key);
            }
        }
    }

    pub fn is_locked(&self, key: &TileKey) -> bool {
        self.pinned.contains_key(key)
    }

    /// Remove a tile without returning its texture; the caller owns it now
    pub fn remove_tile(&mut self, key: &TileKey) -> Option<CacheEntry> {
        self.pinned.remove(key);
        self.entries.pop(key)
    }

    /// Drop every tile, returning all textures to their pools
    pub fn clear(&mut self) {
        while let Some((_, entry)) = self.entries.pop_lru() {
            entry.release();
        }
        self.pinned.clear();
    }

    /// Cached keys, most recently used first
    pub fn keys(&self) -> Vec<TileKey> {
        self.entries.iter().map(|(key, _)| *key).collect()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.len(),
            capacity: self.capacity(),
            pinned: self.pinned.len(),
            evictions: self.evictions,
        }
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(crate::core::config::RendererConfig::default().cache_capacity)
    }
}
