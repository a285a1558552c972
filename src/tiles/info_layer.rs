//! Overlay placements produced alongside a tile's pixels
//!
//! Labels and icons are not baked into the tile texture; the renderer records
//! where it wants them and the map view lays them out across tiles.

use crate::core::geo::{Point, Rect};
use serde::{Deserialize, Serialize};

/// One label or icon placed by the renderer, in tile pixel coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayElement {
    pub label: String,
    /// Anchor point; the element belongs to the tile containing it
    pub pivot: Point,
    /// Screen-space bounds of the rendered element
    pub rect: Rect,
    /// Higher priority elements win when overlapping elements are culled
    pub priority: i32,
}

impl OverlayElement {
    pub fn new(label: impl Into<String>, pivot: Point, rect: Rect, priority: i32) -> Self {
        Self {
            label: label.into(),
            pivot,
            rect,
            priority,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfoLayer {
    elements: Vec<OverlayElement>,
    could_overlap: bool,
}

impl InfoLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether elements may overlap each other (culling happens later)
    pub fn set_could_overlap(&mut self, flag: bool) {
        self.could_overlap = flag;
    }

    pub fn could_overlap(&self) -> bool {
        self.could_overlap
    }

    /// Add an element. Unless overlap is allowed, an element intersecting a
    /// higher-or-equal priority one is dropped and lower priority ones it
    /// intersects are replaced.
    pub fn add(&mut self, element: OverlayElement) {
        if !self.could_overlap {
            if self
                .elements
                .iter()
                .any(|e| e.priority >= element.priority && e.rect.intersects(&element.rect))
            {
                return;
            }
            self.elements
                .retain(|e| !e.rect.intersects(&element.rect));
        }
        self.elements.push(element);
    }

    /// Keep only the elements anchored inside `rect`. The others are drawn
    /// by the neighbouring tile that contains their pivot.
    pub fn clip(&mut self, rect: &Rect) {
        self.elements.retain(|e| rect.contains_point(&e.pivot));
    }

    pub fn elements(&self) -> &[OverlayElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn clear(&mut self) {
        self.elements.clear();
    }
}
