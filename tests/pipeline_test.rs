use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tilerender::prelude::*;
use tilerender::{renderer_fn, ContextOp};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn world() -> Rect {
    Rect::new(-1000.0, -1000.0, 1000.0, 1000.0)
}

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() < 1e-6, "{} != {}", a, b);
}

fn assert_rect_close(a: &Rect, b: &Rect) {
    assert_close(a.min_x, b.min_x);
    assert_close(a.min_y, b.min_y);
    assert_close(a.max_x, b.max_x);
    assert_close(a.max_y, b.max_y);
}

#[derive(Debug, Clone, Copy)]
struct Call {
    select_rect: Rect,
    clip_rect: Rect,
    detail_level: u8,
    within_upper_level: bool,
}

/// Records its arguments and places one label inside and one outside the tile
#[derive(Default)]
struct RecordingRenderer {
    calls: Mutex<Vec<Call>>,
}

impl Renderer for RecordingRenderer {
    fn render(
        &self,
        event: &mut PaintEvent<'_>,
        _transform: &ScreenTransform,
        select_rect: &Rect,
        clip_rect: &Rect,
        detail_level: u8,
        within_upper_level: bool,
    ) {
        self.calls.lock().unwrap().push(Call {
            select_rect: *select_rect,
            clip_rect: *clip_rect,
            detail_level,
            within_upper_level,
        });

        let layer = event.info_layer();
        layer.add(OverlayElement::new(
            "inside",
            Point::new(10.0, 10.0),
            Rect::new(5.0, 5.0, 15.0, 15.0),
            1,
        ));
        layer.add(OverlayElement::new(
            "outside",
            Point::new(300.0, 10.0),
            Rect::new(295.0, 5.0, 305.0, 15.0),
            1,
        ));
        event.set_empty_drawing(false);
    }
}

/// Graphics queue whose completion signal moves the view on, as a caller
/// reacting to a finished batch would
#[derive(Default)]
struct AdvancingQueue {
    tiles: Mutex<Option<Arc<TileRenderer>>>,
    completed: AtomicUsize,
    cancelled: AtomicUsize,
}

impl GraphicsQueue for AdvancingQueue {
    fn complete_commands(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        if let Some(tiles) = self.tiles.lock().unwrap().as_ref() {
            tiles.set_sequence_id(tiles.sequence_id() + 1);
        }
    }

    fn cancel_commands(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    fn process_fn(&self, f: Box<dyn FnOnce() + Send>, _immediate: bool) {
        f();
    }
}

struct AdvancingBackend {
    contexts: HeadlessBackend,
    queue: Arc<AdvancingQueue>,
}

impl GraphicsBackend for AdvancingBackend {
    fn create_worker_context(&self, thread_num: usize) -> Box<dyn WorkerContext> {
        self.contexts.create_worker_context(thread_num)
    }

    fn graphics_queue(&self, _thread_num: usize) -> Option<Arc<dyn GraphicsQueue>> {
        Some(self.queue.clone())
    }
}

fn render_one(
    config: RendererConfig,
    backend: &HeadlessBackend,
    renderer: Arc<dyn Renderer>,
    key: TileKey,
) -> (TileRenderer, Arc<TexturePool>) {
    init();
    let pool = Arc::new(TexturePool::new(256, 256, 4));
    let resources: Arc<dyn ResourcePool> = pool.clone();
    let tiles = TileRenderer::new(config, renderer, resources, backend).unwrap();
    tiles.submit_tile(key, 1, Chain::new()).unwrap();
    tiles.wait_until_idle();
    (tiles, pool)
}

#[cfg(test)]
mod pipeline_tests {
    use super::*;

    #[test]
    fn test_graphics_operations_per_tile() {
        let backend = HeadlessBackend::with_queues(1);
        let config = RendererConfig::default().with_workers(1);
        let background = config.background_color;
        let key = TileKey::from_grid(&world(), 3, 2, 5);
        let (tiles, _pool) = render_one(
            config,
            &backend,
            Arc::new(RecordingRenderer::default()),
            key,
        );

        let render_rect = Rect::new(1.0, 1.0, 255.0, 255.0);
        let ops = backend.ops_for(0);
        assert_eq!(ops[0], ContextOp::MakeCurrent);
        assert_eq!(ops[1], ContextOp::AttachDepthBuffer(256, 256));
        assert!(matches!(ops[2], ContextOp::BindScratch(_)));

        let target_id = {
            let cache = tiles.cache_snapshot();
            let cache = cache.lock().unwrap();
            cache.peek_tile(&key).unwrap().render_target.id()
        };
        assert_eq!(
            &ops[3..],
            &[
                ContextOp::SetRenderTarget(target_id),
                ContextOp::BeginFrame,
                ContextOp::Clear(background.with_alpha(0)),
                ContextOp::SetClipRect(render_rect),
                ContextOp::Clear(background),
                ContextOp::EndFrame,
                ContextOp::ReadPixels(Rect::new(0.0, 0.0, 256.0, 256.0)),
                ContextOp::Finish,
                ContextOp::UnbindRenderTarget,
            ]
        );

        let queue = backend.queue(0).unwrap();
        assert_eq!(queue.processed(), 1);
        assert_eq!(queue.completed(), 1);
        assert_eq!(queue.cancelled(), 0);
    }

    #[test]
    fn test_overlay_is_clipped_to_tile() {
        let backend = HeadlessBackend::new();
        let key = TileKey::from_grid(&world(), 2, 1, 1);
        let (tiles, _pool) = render_one(
            RendererConfig::default().with_workers(1),
            &backend,
            Arc::new(RecordingRenderer::default()),
            key,
        );

        let cache = tiles.cache_snapshot();
        let cache = cache.lock().unwrap();
        let tile = cache.peek_tile(&key).unwrap();
        assert_eq!(tile.info_layer.len(), 1);
        assert_eq!(tile.info_layer.elements()[0].label, "inside");
        assert!(!tile.is_empty_drawing);
        assert_eq!(tile.key, key);
    }

    #[test]
    fn test_select_and_clip_rects() {
        let backend = HeadlessBackend::new();
        let renderer = Arc::new(RecordingRenderer::default());
        let key = TileKey::from_grid(&world(), 1, 0, 1);
        let config = RendererConfig::default()
            .with_workers(1)
            .with_visual_scale(2.0);
        let (_tiles, _pool) = render_one(config, &backend, renderer.clone(), key);

        let calls = renderer.calls.lock().unwrap();
        let call = calls[0];
        assert_rect_close(&call.select_rect, &key.rect);

        // 24px at visual scale 2 on each side, in world units
        let world_per_pixel = key.rect.width() / 254.0;
        let margin = 48.0 * world_per_pixel;
        assert_rect_close(&call.clip_rect, &key.rect.inflate(margin, margin));
        assert!(call.clip_rect.contains_rect(&call.select_rect));
    }

    #[test]
    fn test_detail_level_is_capped() {
        let backend = HeadlessBackend::new();
        let renderer = Arc::new(RecordingRenderer::default());
        let pool = Arc::new(TexturePool::new(256, 256, 4));
        let resources: Arc<dyn ResourcePool> = pool.clone();
        let tiles = TileRenderer::new(
            RendererConfig::default().with_workers(1),
            renderer.clone(),
            resources,
            &backend,
        )
        .unwrap();

        tiles
            .submit_tile(TileKey::from_grid(&world(), 19, 3, 3), 1, Chain::new())
            .unwrap();
        tiles
            .submit_tile(TileKey::from_grid(&world(), 5, 3, 3), 1, Chain::new())
            .unwrap();
        tiles.wait_until_idle();

        let calls = renderer.calls.lock().unwrap();
        assert_eq!(
            (calls[0].detail_level, calls[0].within_upper_level),
            (17, false)
        );
        assert_eq!(
            (calls[1].detail_level, calls[1].within_upper_level),
            (5, true)
        );
    }

    #[test]
    fn test_read_back_can_be_disabled() {
        let backend = HeadlessBackend::with_queues(1);
        let key = TileKey::from_grid(&world(), 2, 0, 0);
        let (tiles, _pool) = render_one(
            RendererConfig::default().with_workers(1).with_read_back(false),
            &backend,
            renderer_fn(|event, _transform, _select, _clip, _level, _within| {
                event.set_empty_drawing(true);
            }),
            key,
        );

        assert!(!backend
            .ops_for(0)
            .iter()
            .any(|op| matches!(op, ContextOp::ReadPixels(_))));
        assert_eq!(backend.queue(0).unwrap().processed(), 0);

        let cache = tiles.cache_snapshot();
        assert!(cache.lock().unwrap().peek_tile(&key).unwrap().is_empty_drawing);
    }

    #[test]
    fn test_stale_tile_discards_queued_commands() {
        let backend = HeadlessBackend::with_queues(1);
        let pool = Arc::new(TexturePool::new(256, 256, 4));
        let resources: Arc<dyn ResourcePool> = pool.clone();

        // the view moves on while the tile is being drawn
        let sequence = Arc::new(Mutex::new(None::<Arc<TileRenderer>>));
        let handle = sequence.clone();
        let renderer = renderer_fn(move |_event, _transform, _select, _clip, _level, _within| {
            if let Some(tiles) = handle.lock().unwrap().as_ref() {
                tiles.set_sequence_id(7);
            }
        });

        init();
        let tiles = Arc::new(
            TileRenderer::new(
                RendererConfig::default().with_workers(1),
                renderer,
                resources,
                &backend,
            )
            .unwrap(),
        );
        *sequence.lock().unwrap() = Some(tiles.clone());

        tiles
            .submit_tile(TileKey::from_grid(&world(), 2, 1, 0), 1, Chain::new())
            .unwrap();
        tiles.wait_until_idle();
        sequence.lock().unwrap().take();

        let queue = backend.queue(0).unwrap();
        assert_eq!(queue.cancelled(), 1);
        assert_eq!(queue.completed(), 0);
        assert_eq!(tiles.stats().abandoned, 1);
        assert_eq!(tiles.sequence_id(), 7);
        assert_eq!(pool.stats().outstanding, 0);
        assert!(tiles.cache_snapshot().lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_tile_skips_read_back() {
        let backend = HeadlessBackend::with_queues(1);
        let pool = Arc::new(TexturePool::new(256, 256, 4));
        let resources: Arc<dyn ResourcePool> = pool.clone();

        let owner = Arc::new(Mutex::new(None::<Arc<TileRenderer>>));
        let handle = owner.clone();
        let renderer = renderer_fn(move |_event, _transform, _select, _clip, _level, _within| {
            if let Some(tiles) = handle.lock().unwrap().as_ref() {
                tiles.cancel_pending();
            }
        });

        init();
        let tiles = Arc::new(
            TileRenderer::new(
                RendererConfig::default().with_workers(1),
                renderer,
                resources,
                &backend,
            )
            .unwrap(),
        );
        *owner.lock().unwrap() = Some(tiles.clone());

        tiles
            .submit_tile(TileKey::from_grid(&world(), 2, 2, 2), 1, Chain::new())
            .unwrap();
        tiles.wait_until_idle();
        owner.lock().unwrap().take();

        let ops = backend.ops_for(0);
        assert!(ops.contains(&ContextOp::EndFrame));
        assert!(!ops.iter().any(|op| matches!(op, ContextOp::ReadPixels(_))));

        let queue = backend.queue(0).unwrap();
        assert_eq!(queue.processed(), 0);
        assert_eq!(queue.cancelled(), 1);
        assert_eq!(tiles.stats().abandoned, 1);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_completed_commands_always_publish_their_tile() {
        let backend = AdvancingBackend {
            contexts: HeadlessBackend::new(),
            queue: Arc::new(AdvancingQueue::default()),
        };
        let pool = Arc::new(TexturePool::new(256, 256, 4));
        let resources: Arc<dyn ResourcePool> = pool.clone();

        init();
        let tiles = Arc::new(
            TileRenderer::new(
                RendererConfig::default().with_workers(1),
                Arc::new(RecordingRenderer::default()),
                resources,
                &backend,
            )
            .unwrap(),
        );
        *backend.queue.tiles.lock().unwrap() = Some(tiles.clone());

        let key = TileKey::from_grid(&world(), 2, 3, 1);
        tiles.submit_tile(key, 1, Chain::new()).unwrap();
        tiles.wait_until_idle();
        backend.queue.tiles.lock().unwrap().take();

        // the view moved on right after the batch was finalized
        assert_eq!(tiles.sequence_id(), 2);
        assert_eq!(backend.queue.completed.load(Ordering::SeqCst), 1);
        assert_eq!(backend.queue.cancelled.load(Ordering::SeqCst), 0);

        let stats = tiles.stats();
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.abandoned, 0);
        assert!(tiles.cache_snapshot().lock().unwrap().has_tile(&key));
        assert_eq!(pool.stats().outstanding, 1);
        assert_eq!(pool.stats().freed, 0);
    }

    #[test]
    fn test_labels_of_one_tile_may_overlap() {
        let backend = HeadlessBackend::new();
        let key = TileKey::from_grid(&world(), 2, 2, 1);
        let (tiles, _pool) = render_one(
            RendererConfig::default().with_workers(1),
            &backend,
            renderer_fn(|event, _transform, _select, _clip, _level, _within| {
                let layer = event.info_layer();
                layer.add(OverlayElement::new(
                    "road",
                    Point::new(100.0, 100.0),
                    Rect::new(90.0, 95.0, 130.0, 105.0),
                    3,
                ));
                layer.add(OverlayElement::new(
                    "river",
                    Point::new(110.0, 100.0),
                    Rect::new(100.0, 95.0, 140.0, 105.0),
                    3,
                ));
            }),
            key,
        );

        let cache = tiles.cache_snapshot();
        let cache = cache.lock().unwrap();
        let tile = cache.peek_tile(&key).unwrap();
        assert!(tile.info_layer.could_overlap());
        assert_eq!(tile.info_layer.len(), 2);
    }
}
