//! GPU storage for pooled render targets.

use crate::prelude::{HashMap, Mutex};
use crate::rendering::pool::TextureAllocator;
use std::sync::{Arc, PoisonError};
use wgpu::{Device, Texture, TextureFormat, TextureView};

/// Allocates pool textures on a wgpu device, keyed by handle id
pub struct GpuTextureAllocator {
    device: Arc<Device>,
    format: TextureFormat,
    textures: Mutex<HashMap<u64, Texture>>,
}

impl GpuTextureAllocator {
    pub fn new(device: Arc<Device>, format: TextureFormat) -> Self {
        Self {
            device,
            format,
            textures: Mutex::new(HashMap::default()),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Run `f` against the texture behind a handle id
    pub fn with_texture<R>(&self, id: u64, f: impl FnOnce(&Texture) -> R) -> Option<R> {
        self.textures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(f)
    }

    /// Default view of the texture behind a handle id
    pub fn create_view(&self, id: u64) -> Option<TextureView> {
        self.with_texture(id, |texture| {
            texture.create_view(&wgpu::TextureViewDescriptor::default())
        })
    }

    /// Number of live GPU textures
    pub fn texture_count(&self) -> usize {
        self.textures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl TextureAllocator for GpuTextureAllocator {
    fn allocate(&self, id: u64, width: u32, height: u32) {
        let label = format!("tile-target-{}", id);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label.as_str()),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        self.textures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, texture);
    }

    fn destroy(&self, id: u64) {
        let removed = self
            .textures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if let Some(texture) = removed {
            texture.destroy();
        }
    }
}
