pub mod cache;
pub mod in_progress;
pub mod info_layer;
pub mod key;
pub mod tile;

// Re-exports for convenience
pub use cache::{CacheEntry, CacheStats, SharedTileCache, TileCache};
pub use in_progress::{InProgressGuard, TileSet};
pub use info_layer::{InfoLayer, OverlayElement};
pub use key::TileKey;
pub use tile::Tile;
