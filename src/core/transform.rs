use crate::core::geo::{Point, Rect};
use serde::{Deserialize, Serialize};

/// Maps between a tile's pixel space and world coordinates.
///
/// Pixel space has its y axis pointing down, world space up. The world rect a
/// transform is built from is fitted into the pixel rect with a uniform scale
/// and centered, so non-square world rects keep their aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenTransform {
    /// Pixel area the world rect was fitted into
    pixel_rect: Rect,
    /// World point shown at the center of `pixel_rect`
    world_center: Point,
    /// World units per pixel
    scale: f64,
}

impl ScreenTransform {
    /// Fits `world_rect` into `pixel_rect`
    pub fn from_rect(pixel_rect: Rect, world_rect: &Rect) -> Self {
        let sx = if pixel_rect.width() > 0.0 {
            world_rect.width() / pixel_rect.width()
        } else {
            0.0
        };
        let sy = if pixel_rect.height() > 0.0 {
            world_rect.height() / pixel_rect.height()
        } else {
            0.0
        };
        let scale = sx.max(sy);

        Self {
            pixel_rect,
            world_center: world_rect.center(),
            scale: if scale > 0.0 { scale } else { 1.0 },
        }
    }

    pub fn pixel_rect(&self) -> &Rect {
        &self.pixel_rect
    }

    /// World units covered by one pixel
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// World rect visible through the whole pixel rect
    pub fn world_rect(&self) -> Rect {
        self.p_to_g_rect(&self.pixel_rect)
    }

    /// Pixel to world ("pixel to global")
    pub fn p_to_g(&self, pixel: &Point) -> Point {
        let pc = self.pixel_rect.center();
        Point::new(
            self.world_center.x + (pixel.x - pc.x) * self.scale,
            self.world_center.y - (pixel.y - pc.y) * self.scale,
        )
    }

    /// World to pixel ("global to pixel")
    pub fn g_to_p(&self, world: &Point) -> Point {
        let pc = self.pixel_rect.center();
        Point::new(
            pc.x + (world.x - self.world_center.x) / self.scale,
            pc.y - (world.y - self.world_center.y) / self.scale,
        )
    }

    pub fn p_to_g_rect(&self, pixel: &Rect) -> Rect {
        let corners = pixel.corners().map(|c| self.p_to_g(&c));
        // corners is never empty
        Rect::bounding(&corners).unwrap_or(*pixel)
    }

    pub fn g_to_p_rect(&self, world: &Rect) -> Rect {
        let corners = world.corners().map(|c| self.g_to_p(&c));
        Rect::bounding(&corners).unwrap_or(*world)
    }
}
