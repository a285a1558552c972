use crate::core::transform::ScreenTransform;
use crate::tiles::info_layer::InfoLayer;
use crate::tiles::key::TileKey;
use crate::traits::TextureHandle;
use std::sync::Arc;
use std::time::Duration;

/// A finished tile: its texture plus everything needed to place it on screen
#[derive(Debug)]
pub struct Tile {
    /// Texture the tile was drawn into, owned until the cache evicts it
    pub render_target: TextureHandle,
    /// Label and icon placements, shared independently of the pixels
    pub info_layer: Arc<InfoLayer>,
    /// Pixel/world mapping the tile was drawn with
    pub transform: ScreenTransform,
    pub key: TileKey,
    /// Wall time spent rendering
    pub duration: Duration,
    /// The renderer drew nothing but background
    pub is_empty_drawing: bool,
}

impl Tile {
    pub fn new(
        render_target: TextureHandle,
        info_layer: Arc<InfoLayer>,
        transform: ScreenTransform,
        key: TileKey,
        duration: Duration,
        is_empty_drawing: bool,
    ) -> Self {
        Self {
            render_target,
            info_layer,
            transform,
            key,
            duration,
            is_empty_drawing,
        }
    }
}
