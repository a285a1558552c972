//! Prelude module for common tilerender types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use tilerender::prelude::*;`

pub use crate::core::{
    config::{RendererConfig, RendererProfile},
    geo::{Color, Point, Rect},
    transform::ScreenTransform,
};

pub use crate::background::queue::{Chain, CommandsQueue, Environment};

pub use crate::tiles::{
    cache::{CacheEntry, CacheStats, SharedTileCache, TileCache},
    in_progress::TileSet,
    info_layer::{InfoLayer, OverlayElement},
    key::TileKey,
    tile::Tile,
};

pub use crate::rendering::{
    headless::{HeadlessBackend, HeadlessContext},
    pool::{PoolStats, TexturePool},
};

pub use crate::renderer::{PaintEvent, RendererStats, TileOutcome, TileRenderer};

pub use crate::traits::{
    GraphicsBackend, GraphicsQueue, Renderer, ResourcePool, TextureHandle, WorkerContext,
};

pub use crate::{Error, Result};

pub use std::{
    sync::{Arc, Mutex, Weak},
    time::{Duration, Instant},
};

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};
