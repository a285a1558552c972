//! Core constants of the tile pipeline.
//! Keeping them in a single place makes it easier to tweak engine-wide magic numbers.

/// Default square tile size in pixels.
pub const TILE_SIZE: u32 = 256;

/// Highest detail level the map data provides. Tiles requested above it are
/// drawn with this level's content.
pub const UPPER_DETAIL_LEVEL: u8 = 17;

/// Margin, in pixels at visual scale 1.0, by which the clip rectangle extends
/// past the tile so that features straddling the edge are not cut off.
pub const CLIP_INFLATION_PX: f64 = 24.0;

/// Guard border, in pixels, between the render target edge and the drawn area.
pub const RENDER_RECT_BORDER: f64 = 1.0;

/// Size of the per-worker scratch target bound before a tile target.
pub const SCRATCH_TARGET_SIZE: (u32, u32) = (2, 2);

/// Bytes per pixel of tile readback (RGBA8).
pub const BYTES_PER_PIXEL: usize = 4;

/// Shared readback buffers kept per size class.
pub const MAX_SHARED_BUFFERS_PER_SIZE: usize = 8;
