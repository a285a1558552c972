//! The per-request tile pipeline run on a render thread.
//!
//! admit -> reserve target -> draw -> read back -> publish or abandon.
//! The in-progress mark and the render target are both held by guards, so
//! every early return releases them.

use crate::background::queue::Environment;
use crate::core::constants::{BYTES_PER_PIXEL, RENDER_RECT_BORDER};
use crate::core::geo::Rect;
use crate::core::transform::ScreenTransform;
use crate::renderer::tile_renderer::{RendererShared, ThreadData};
use crate::renderer::{PaintEvent, TileOutcome};
use crate::rendering::buffers::SharedBufferPool;
use crate::tiles::cache::CacheEntry;
use crate::tiles::info_layer::InfoLayer;
use crate::tiles::key::TileKey;
use crate::tiles::tile::Tile;
use crate::traits::{ResourcePool, TextureHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

/// A reserved render target that goes back to its pool unless committed.
///
/// Nothing is returned while the renderer is exiting, since the pool may be
/// torn down concurrently.
struct ReservedTarget<'a> {
    texture: Option<TextureHandle>,
    resources: &'a dyn ResourcePool,
    exiting: &'a AtomicBool,
}

impl<'a> ReservedTarget<'a> {
    fn new(texture: TextureHandle, resources: &'a dyn ResourcePool, exiting: &'a AtomicBool) -> Self {
        Self {
            texture: Some(texture),
            resources,
            exiting,
        }
    }

    fn texture(&self) -> Option<&TextureHandle> {
        self.texture.as_ref()
    }

    /// Hand ownership to the caller; the guard will no longer free it
    fn commit(mut self) -> Option<TextureHandle> {
        self.texture.take()
    }
}

impl Drop for ReservedTarget<'_> {
    fn drop(&mut self) {
        if let Some(texture) = self.texture.take() {
            if self.exiting.load(Ordering::Acquire) {
                log::debug!("exiting, render target {} not returned", texture.id());
            } else {
                self.resources.free_render_target(texture);
            }
        }
    }
}

/// Pixel rect the tile is drawn into: the target minus a one pixel border
pub(crate) fn render_rect(width: u32, height: u32) -> Rect {
    Rect::new(
        RENDER_RECT_BORDER,
        RENDER_RECT_BORDER,
        width as f64 - RENDER_RECT_BORDER,
        height as f64 - RENDER_RECT_BORDER,
    )
}

pub(crate) fn draw_tile(
    shared: &RendererShared,
    env: &Environment,
    key: TileKey,
    sequence_id: u64,
) -> TileOutcome {
    if shared.is_exiting() {
        return TileOutcome::ShuttingDown;
    }
    if shared.paused.load(Ordering::Acquire) {
        return TileOutcome::Paused;
    }
    if env.is_cancelled() {
        return TileOutcome::Cancelled;
    }
    if shared.is_stale(sequence_id) {
        return TileOutcome::Stale;
    }

    // Published tiles are cached before their mark is dropped, so checking
    // the cache after winning the mark cannot miss a finished render.
    let Some(_in_progress) = shared.in_progress.try_start(key) else {
        return TileOutcome::InProgress;
    };
    {
        let mut cache = shared.lock_cache();
        if cache.has_tile(&key) {
            cache.touch(&key);
            return TileOutcome::AlreadyCached;
        }
    }

    let Some(texture) = shared.resources.reserve_render_target() else {
        return TileOutcome::ResourceUnavailable;
    };
    let target = ReservedTarget::new(texture, shared.resources.as_ref(), &shared.exiting);
    if shared.resources.is_cancelled() {
        return TileOutcome::ResourceUnavailable;
    }

    let Some(thread) = shared.threads.get(env.thread_num()) else {
        log::error!("no graphics state for render thread {}", env.thread_num());
        return TileOutcome::Abandoned;
    };

    let started = Instant::now();
    let (width, height) = match target.texture() {
        Some(texture) => (texture.width(), texture.height()),
        None => return TileOutcome::Abandoned,
    };
    let render_rect = render_rect(width, height);
    let transform = ScreenTransform::from_rect(render_rect, &key.rect);
    let select_rect = transform.p_to_g_rect(&render_rect);
    let inflation = shared.config.scaled_clip_inflation();
    let clip_rect = transform.p_to_g_rect(&render_rect.inflate(inflation, inflation));

    let upper = shared.config.upper_detail_level;
    let detail_level = key.level.min(upper);
    let within_upper_level = key.level <= upper;

    let background = shared.config.background_color;
    let mut info_layer = InfoLayer::new();
    // overlaps are resolved across tiles by the map view
    info_layer.set_could_overlap(true);
    let is_empty_drawing;
    {
        let mut guard = thread.lock_context();
        let (Some(context), Some(texture)) = (guard.as_deref_mut(), target.texture()) else {
            return TileOutcome::ShuttingDown;
        };

        context.bind_scratch_target(&thread.scratch);
        context.set_render_target(texture);
        context.begin_frame();
        context.clear(background.with_alpha(0));
        context.set_clip_rect(&render_rect);
        context.clear(background);

        let mut event = PaintEvent::new(&mut *context, &mut info_layer, env);
        shared.renderer.render(
            &mut event,
            &transform,
            &select_rect,
            &clip_rect,
            detail_level,
            within_upper_level,
        );
        is_empty_drawing = event.is_empty_drawing();

        context.end_frame();
    }

    if !env.is_cancelled() {
        // placements outside belong to the neighbouring tile
        info_layer.clip(&render_rect);
    }

    if shared.config.read_back_pixels && !env.is_cancelled() {
        read_back(thread, env, width, height);
    }

    if let Some(context) = thread.lock_context().as_deref_mut() {
        context.finish();
        context.unbind_render_target();
    }

    // One decision, under the cache lock, drives both the queued commands
    // and the fate of the target.
    let mut cache = shared.lock_cache();
    let exiting = shared.is_exiting();
    let abandon = exiting || env.is_cancelled() || shared.is_stale(sequence_id);
    if let Some(queue) = &thread.queue {
        if !abandon {
            queue.complete_commands();
        } else if !exiting {
            queue.cancel_commands();
        }
    }
    if exiting {
        return TileOutcome::ShuttingDown;
    }
    if abandon {
        return TileOutcome::Abandoned;
    }
    if cache.has_tile(&key) {
        cache.touch(&key);
        return TileOutcome::Duplicate;
    }
    if cache.can_fit() == 0 {
        let grown = cache.capacity() + 1;
        log::info!("resizing tile cache to {} elements", grown);
        cache.resize(grown);
    }

    let Some(texture) = target.commit() else {
        return TileOutcome::Abandoned;
    };
    let tile = Tile::new(
        texture,
        Arc::new(info_layer),
        transform,
        key,
        started.elapsed(),
        is_empty_drawing,
    );
    cache.add_tile(key, CacheEntry::new(tile, &shared.resources));
    TileOutcome::Committed
}

/// Copy the whole target off the GPU through a shared scratch buffer, on the
/// thread's graphics queue when it has one
fn read_back(thread: &ThreadData, env: &Environment, width: u32, height: u32) {
    let size = width as usize * height as usize * BYTES_PER_PIXEL;
    let rect = Rect::from_size(width as f64, height as f64);
    let context = thread.context.clone();
    let env = env.clone();
    let copy = move || {
        // a queued copy may run after the request was cancelled
        if env.is_cancelled() {
            return;
        }
        let buffers = SharedBufferPool::instance();
        let mut buffer = buffers.reserve(size);
        if let Some(context) = context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref_mut()
        {
            context.read_pixels(&rect, &mut buffer);
        }
        buffers.free(size, buffer);
    };

    match &thread.queue {
        Some(queue) => queue.process_fn(Box::new(copy), true),
        None => copy(),
    }
}
