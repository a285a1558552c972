//! # tilerender
//!
//! Multi-threaded map tile rendering pipeline.
//!
//! Tile requests are tagged with a view generation (sequence id) and executed on
//! a fixed pool of worker threads, each bound to its own graphics context.
//! Finished tiles land in a capacity-managed cache whose GPU textures are handed
//! back to the resource pool on eviction. Work that becomes stale while the user
//! pans or zooms is abandoned cooperatively and its resources are released.

pub mod background;
pub mod core;
pub mod prelude;
pub mod renderer;
pub mod rendering;
pub mod tiles;
pub mod traits;
pub use crate::core::constants;

// Re-export public API
pub use crate::core::{
    config::{RendererConfig, RendererProfile},
    geo::{Color, Point, Rect},
    transform::ScreenTransform,
};

pub use background::queue::{Chain, CommandsQueue, Environment};

pub use tiles::{
    cache::{CacheEntry, CacheStats, SharedTileCache, TileCache},
    in_progress::{InProgressGuard, TileSet},
    info_layer::{InfoLayer, OverlayElement},
    key::TileKey,
    tile::Tile,
};

pub use rendering::{
    buffers::SharedBufferPool,
    headless::{ContextOp, HeadlessBackend, HeadlessContext, RecordingQueue},
    pool::{PoolStats, TextureAllocator, TexturePool},
};

#[cfg(feature = "render")]
pub use rendering::resources::GpuTextureAllocator;

pub use renderer::{PaintEvent, RendererStats, TileOutcome, TileRenderer};

pub use traits::{
    renderer_fn, GraphicsBackend, GraphicsQueue, Renderer, ResourcePool, TextureHandle,
    WorkerContext,
};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn render thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("command queue is closed")]
    QueueClosed,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Initialise `env_logger` from `RUST_LOG`. Does nothing if a logger is
/// already installed.
#[cfg(feature = "debug")]
pub fn init_logging() {
    let _ = env_logger::builder().format_timestamp_millis().try_init();
}
