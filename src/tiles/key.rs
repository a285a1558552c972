use crate::core::geo::Rect;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a tile: its world rectangle, detail level and grid position.
///
/// Keys are compared on grid position first and on the exact bit pattern of
/// the rectangle last, so equality, ordering and hashing all agree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TileKey {
    pub rect: Rect,
    pub level: u8,
    pub x: i32,
    pub y: i32,
}

impl TileKey {
    pub fn new(rect: Rect, level: u8, x: i32, y: i32) -> Self {
        Self { rect, level, x, y }
    }

    /// Key of grid cell (`x`, `y`) at `level` when `world` is split into
    /// 2^level × 2^level tiles. Rows are counted from the top (max y) down.
    pub fn from_grid(world: &Rect, level: u8, x: i32, y: i32) -> Self {
        let n = 2_f64.powi(level as i32);
        let w = world.width() / n;
        let h = world.height() / n;

        let min_x = world.min_x + x as f64 * w;
        let max_y = world.max_y - y as f64 * h;
        Self::new(Rect::new(min_x, max_y - h, min_x + w, max_y), level, x, y)
    }

    /// Key of the enclosing tile one level up, on the same world grid
    pub fn parent(&self, world: &Rect) -> Option<TileKey> {
        if self.level == 0 {
            None
        } else {
            Some(Self::from_grid(
                world,
                self.level - 1,
                self.x.div_euclid(2),
                self.y.div_euclid(2),
            ))
        }
    }
}

impl PartialEq for TileKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TileKey {}

impl PartialOrd for TileKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TileKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.level
            .cmp(&other.level)
            .then_with(|| self.x.cmp(&other.x))
            .then_with(|| self.y.cmp(&other.y))
            .then_with(|| self.rect.total_cmp(&other.rect))
    }
}

impl Hash for TileKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.level.hash(state);
        self.x.hash(state);
        self.y.hash(state);
        self.rect.bit_pattern().hash(state);
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.level, self.x, self.y)
    }
}
