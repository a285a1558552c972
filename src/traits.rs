//! Interfaces of the collaborators the tile pipeline orchestrates
//!
//! The pipeline never draws anything itself and never talks to a graphics API
//! directly. It drives these traits: a resource pool handing out render
//! targets, a per-thread graphics context, an optional command queue for
//! asynchronous GPU submission and the map renderer callback.

use crate::core::geo::{Color, Rect};
use crate::core::transform::ScreenTransform;
use crate::renderer::PaintEvent;
use std::any::Any;
use std::sync::Arc;

/// Ownership token for a texture reserved from a [`ResourcePool`].
///
/// Deliberately neither `Clone` nor `Copy`: whoever holds the handle owns the
/// texture and must either keep it (in the tile cache) or give it back with
/// [`ResourcePool::free_render_target`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle {
    id: u64,
    width: u32,
    height: u32,
}

impl TextureHandle {
    /// Only resource pools should mint handles
    pub fn new(id: u64, width: u32, height: u32) -> Self {
        Self { id, width, height }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Source of reusable GPU render targets. Must be internally thread-safe.
pub trait ResourcePool: Send + Sync {
    /// Dimensions of the render targets handed out by `reserve_render_target`
    fn render_target_size(&self) -> (u32, u32);

    /// Reserve a render target, blocking until one is free.
    ///
    /// Returns `None` when the pool was cancelled while waiting.
    fn reserve_render_target(&self) -> Option<TextureHandle>;

    /// Give a reserved render target back for reuse
    fn free_render_target(&self, texture: TextureHandle);

    /// Whether reservations are currently being cancelled
    fn is_cancelled(&self) -> bool;

    /// Allocate a standalone target outside the pooled set
    fn create_scratch_target(&self, width: u32, height: u32) -> TextureHandle;
}

/// Command queue used when a worker's drawing is replayed asynchronously on
/// another thread instead of hitting the GPU directly.
pub trait GraphicsQueue: Send + Sync {
    /// Finalize the batch of commands recorded for the current tile
    fn complete_commands(&self);

    /// Discard the batch of commands recorded for the current tile
    fn cancel_commands(&self);

    /// Run `f` in the queue's GPU context. With `immediate` the call returns
    /// only after `f` has run.
    fn process_fn(&self, f: Box<dyn FnOnce() + Send>, immediate: bool);
}

/// Graphics context owned by one render thread, sharing GPU objects with the
/// primary context.
pub trait WorkerContext: Send {
    /// Bind the context to the calling thread
    fn make_current(&mut self);

    /// Release the context from the calling thread
    fn end_thread_drawing(&mut self);

    fn attach_depth_buffer(&mut self, width: u32, height: u32);

    /// Bind a target that is never sampled, so the next tile target is not
    /// simultaneously bound as a texture
    fn bind_scratch_target(&mut self, scratch: &TextureHandle);

    fn set_render_target(&mut self, target: &TextureHandle);

    fn unbind_render_target(&mut self);

    fn begin_frame(&mut self);

    fn clear(&mut self, color: Color);

    fn set_clip_rect(&mut self, rect: &Rect);

    fn end_frame(&mut self);

    /// Flush recorded drawing to the GPU
    fn finish(&mut self);

    /// Copy the pixels of `rect` of the bound target into `buffer` (RGBA8)
    fn read_pixels(&mut self, rect: &Rect, buffer: &mut [u8]);

    /// Concrete context, for renderers that draw with backend primitives
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Factory for the per-thread graphics state of the render pool
pub trait GraphicsBackend: Send + Sync {
    /// Create the context render thread `thread_num` will own
    fn create_worker_context(&self, thread_num: usize) -> Box<dyn WorkerContext>;

    /// Command queue for thread `thread_num`, if its drawing is queued
    fn graphics_queue(&self, _thread_num: usize) -> Option<Arc<dyn GraphicsQueue>> {
        None
    }
}

/// Map drawing callback. Invoked concurrently from every render thread.
pub trait Renderer: Send + Sync {
    /// Draw the map content of one tile.
    ///
    /// `select_rect` is the exact tile extent in world coordinates and
    /// `clip_rect` the extent inflated for edge-straddling features.
    /// `detail_level` is capped at the highest level the data provides;
    /// `within_upper_level` is false when the tile asked for more detail.
    fn render(
        &self,
        event: &mut PaintEvent<'_>,
        transform: &ScreenTransform,
        select_rect: &Rect,
        clip_rect: &Rect,
        detail_level: u8,
        within_upper_level: bool,
    );
}

impl<F> Renderer for F
where
    F: Fn(&mut PaintEvent<'_>, &ScreenTransform, &Rect, &Rect, u8, bool) + Send + Sync,
{
    fn render(
        &self,
        event: &mut PaintEvent<'_>,
        transform: &ScreenTransform,
        select_rect: &Rect,
        clip_rect: &Rect,
        detail_level: u8,
        within_upper_level: bool,
    ) {
        self(
            event,
            transform,
            select_rect,
            clip_rect,
            detail_level,
            within_upper_level,
        )
    }
}

/// Wrap a closure as a shareable [`Renderer`]
pub fn renderer_fn<F>(f: F) -> Arc<dyn Renderer>
where
    F: Fn(&mut PaintEvent<'_>, &ScreenTransform, &Rect, &Rect, u8, bool)
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}
