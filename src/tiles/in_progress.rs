use crate::prelude::{HashSet, Mutex};
use crate::tiles::key::TileKey;
use std::sync::PoisonError;

/// Set of tiles currently being rendered by some worker.
///
/// Membership is the only record of "this tile is already being produced",
/// so a key must leave the set on every exit path of a render. Use
/// [`TileSet::try_start`], whose guard does that on drop.
#[derive(Debug, Default)]
pub struct TileSet {
    tiles: Mutex<HashSet<TileKey>>,
}

impl TileSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, HashSet<TileKey>> {
        self.tiles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a tile as in progress. Returns false if it already was.
    pub fn start(&self, key: TileKey) -> bool {
        self.locked().insert(key)
    }

    pub fn finish(&self, key: &TileKey) {
        self.locked().remove(key);
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.locked().contains(key)
    }

    /// Atomically check and mark a tile as in progress. The returned guard
    /// removes the mark when dropped.
    pub fn try_start(&self, key: TileKey) -> Option<InProgressGuard<'_>> {
        if self.start(key) {
            Some(InProgressGuard { set: self, key })
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.locked().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }
}

/// Keeps a tile marked as in progress for as long as it lives
#[derive(Debug)]
pub struct InProgressGuard<'a> {
    set: &'a TileSet,
    key: TileKey,
}

impl InProgressGuard<'_> {
    pub fn key(&self) -> &TileKey {
        &self.key
    }
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.set.finish(&self.key);
    }
}
