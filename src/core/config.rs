//! Configuration for the tile renderer
//!
//! Presets cover the common deployments; `Custom` lets callers tune every knob.
//! Configurations can also be loaded from JSON.

use crate::core::constants::{CLIP_INFLATION_PX, UPPER_DETAIL_LEVEL};
use crate::core::geo::Color;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub enum RendererProfile {
    Balanced,
    LowMemory,
    HighThroughput,
    Custom(RendererConfig),
}

impl RendererProfile {
    pub fn resolve(&self) -> RendererConfig {
        match self {
            Self::Balanced => RendererConfig {
                worker_count: 2,
                cache_capacity: 128,
                ..RendererConfig::base()
            },
            Self::LowMemory => RendererConfig {
                worker_count: 1,
                cache_capacity: 32,
                read_back_pixels: false,
                ..RendererConfig::base()
            },
            Self::HighThroughput => RendererConfig {
                worker_count: 4,
                cache_capacity: 512,
                ..RendererConfig::base()
            },
            Self::Custom(config) => config.clone(),
        }
    }
}

impl Default for RendererProfile {
    fn default() -> Self {
        Self::Balanced
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of render threads, each with its own graphics context
    pub worker_count: usize,
    /// Initial tile cache capacity; grows on demand when every tile is pinned
    pub cache_capacity: usize,
    /// Display density multiplier (2.0 on retina screens)
    pub visual_scale: f64,
    /// Tile background colour
    pub background_color: Color,
    /// Clip rect margin in pixels at visual scale 1.0
    pub clip_inflation: f64,
    /// Highest detail level the map data provides
    pub upper_detail_level: u8,
    /// Read finished tiles back from the GPU before publishing them
    pub read_back_pixels: bool,
    /// Render thread names are this prefix followed by the worker index
    pub thread_name_prefix: String,
}

impl RendererConfig {
    fn base() -> Self {
        Self {
            worker_count: 2,
            cache_capacity: 128,
            visual_scale: 1.0,
            background_color: Color::default(),
            clip_inflation: CLIP_INFLATION_PX,
            upper_detail_level: UPPER_DETAIL_LEVEL,
            read_back_pixels: true,
            thread_name_prefix: "tile-render-".to_string(),
        }
    }

    /// Parses a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: RendererConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::InvalidConfig(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(Error::InvalidConfig(
                "cache_capacity must be at least 1".to_string(),
            ));
        }
        if !(self.visual_scale > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "visual_scale must be positive, got {}",
                self.visual_scale
            )));
        }
        if !(self.clip_inflation >= 0.0) {
            return Err(Error::InvalidConfig(format!(
                "clip_inflation must not be negative, got {}",
                self.clip_inflation
            )));
        }
        Ok(())
    }

    /// Clip margin in pixels after applying the visual scale
    pub fn scaled_clip_inflation(&self) -> f64 {
        self.clip_inflation * self.visual_scale
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    pub fn with_visual_scale(mut self, visual_scale: f64) -> Self {
        self.visual_scale = visual_scale;
        self
    }

    pub fn with_read_back(mut self, read_back_pixels: bool) -> Self {
        self.read_back_pixels = read_back_pixels;
        self
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        RendererProfile::default().resolve()
    }
}
