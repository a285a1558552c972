use crate::background::queue::{Chain, CommandsQueue, Environment};
use crate::core::config::RendererConfig;
use crate::core::constants::SCRATCH_TARGET_SIZE;
use crate::renderer::pipeline;
use crate::renderer::{OutcomeCounters, RendererStats};
use crate::tiles::cache::{SharedTileCache, TileCache};
use crate::tiles::in_progress::TileSet;
use crate::tiles::key::TileKey;
use crate::traits::{GraphicsBackend, GraphicsQueue, Renderer, ResourcePool, TextureHandle, WorkerContext};
use crate::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Graphics state owned by one render thread
pub(crate) struct ThreadData {
    /// Taken and dropped at shutdown, after the thread has quiesced
    pub(crate) context: Arc<Mutex<Option<Box<dyn WorkerContext>>>>,
    pub(crate) scratch: TextureHandle,
    pub(crate) queue: Option<Arc<dyn GraphicsQueue>>,
}

impl ThreadData {
    pub(crate) fn lock_context(&self) -> MutexGuard<'_, Option<Box<dyn WorkerContext>>> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// State shared between the orchestrator and its render threads
pub(crate) struct RendererShared {
    pub(crate) config: RendererConfig,
    pub(crate) renderer: Arc<dyn Renderer>,
    pub(crate) resources: Arc<dyn ResourcePool>,
    pub(crate) cache: SharedTileCache,
    pub(crate) in_progress: TileSet,
    pub(crate) threads: Vec<ThreadData>,
    pub(crate) sequence_id: AtomicU64,
    pub(crate) paused: AtomicBool,
    pub(crate) exiting: AtomicBool,
    pub(crate) counters: OutcomeCounters,
}

impl RendererShared {
    /// A request is stale once the view has moved past its generation
    pub(crate) fn is_stale(&self, sequence_id: u64) -> bool {
        sequence_id < self.sequence_id.load(Ordering::Acquire)
    }

    pub(crate) fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }

    pub(crate) fn lock_cache(&self) -> MutexGuard<'_, TileCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Renders map tiles on a pool of threads and publishes them to a tile cache.
///
/// Requests carry the sequence id of the view they were made for. Raising the
/// current sequence id with [`TileRenderer::set_sequence_id`] makes every older
/// request stop at its next checkpoint and release its render target instead
/// of publishing.
pub struct TileRenderer {
    shared: Arc<RendererShared>,
    queue: CommandsQueue,
}

impl TileRenderer {
    /// Create the per-thread graphics state and start the render threads
    pub fn new(
        config: RendererConfig,
        renderer: Arc<dyn Renderer>,
        resources: Arc<dyn ResourcePool>,
        backend: &dyn GraphicsBackend,
    ) -> Result<Self> {
        config.validate()?;

        let (scratch_width, scratch_height) = SCRATCH_TARGET_SIZE;
        let threads = (0..config.worker_count)
            .map(|thread_num| ThreadData {
                context: Arc::new(Mutex::new(Some(backend.create_worker_context(thread_num)))),
                scratch: resources.create_scratch_target(scratch_width, scratch_height),
                queue: backend.graphics_queue(thread_num),
            })
            .collect();

        let shared = Arc::new(RendererShared {
            cache: TileCache::shared(config.cache_capacity),
            in_progress: TileSet::new(),
            threads,
            sequence_id: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            exiting: AtomicBool::new(false),
            counters: OutcomeCounters::default(),
            renderer,
            resources,
            config,
        });

        let mut queue = CommandsQueue::new(shared.config.worker_count)
            .with_thread_name_prefix(shared.config.thread_name_prefix.clone());

        let init_shared = shared.clone();
        queue.add_init_command(move |env: &Environment| {
            let (width, height) = init_shared.resources.render_target_size();
            if let Some(context) = init_shared.threads[env.thread_num()].lock_context().as_mut() {
                context.make_current();
                context.attach_depth_buffer(width, height);
            }
        });
        let fin_shared = shared.clone();
        queue.add_fin_command(move |env: &Environment| {
            if let Some(context) = fin_shared.threads[env.thread_num()].lock_context().as_mut() {
                context.end_thread_drawing();
            }
        });

        queue.start()?;
        log::info!(
            "tile renderer started: {} threads, cache capacity {}",
            shared.config.worker_count,
            shared.config.cache_capacity
        );

        Ok(Self { shared, queue })
    }

    pub fn config(&self) -> &RendererConfig {
        &self.shared.config
    }

    /// Schedule `key` for rendering as part of view `sequence_id`.
    ///
    /// `continuation` runs on the render thread right after the attempt,
    /// whatever its outcome. A tile that is already cached is only touched.
    pub fn submit_tile(&self, key: TileKey, sequence_id: u64, continuation: Chain) -> Result<()> {
        self.shared.sequence_id.fetch_max(sequence_id, Ordering::AcqRel);

        let shared = self.shared.clone();
        let mut chain = Chain::new().with_command(move |env: &Environment| {
            let outcome = pipeline::draw_tile(&shared, env, key, sequence_id);
            shared.counters.record(outcome);
            log::debug!("tile {} at sequence {}: {:?}", key, sequence_id, outcome);
        });
        chain.append(continuation);

        self.queue.submit(chain)
    }

    /// Cancel queued requests and flag the running ones; does not block
    pub fn cancel_pending(&self) {
        self.queue.cancel_pending();
    }

    /// Drop queued requests without running them or their continuations
    pub fn clear_pending(&self) -> usize {
        self.queue.clear()
    }

    /// Make every request older than `sequence_id` stale
    pub fn set_sequence_id(&self, sequence_id: u64) {
        self.shared.sequence_id.store(sequence_id, Ordering::Release);
    }

    pub fn sequence_id(&self) -> u64 {
        self.shared.sequence_id.load(Ordering::Acquire)
    }

    /// While paused, requests skip rendering but still run their continuation
    pub fn pause(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Block until no request is queued or running
    pub fn wait_until_idle(&self) {
        self.queue.join();
    }

    /// Pending plus running requests
    pub fn pending_count(&self) -> usize {
        self.queue.pending_count()
    }

    /// Handle to the tile cache; lock it around compound operations
    pub fn cache_snapshot(&self) -> SharedTileCache {
        self.shared.cache.clone()
    }

    pub fn is_in_progress(&self, key: &TileKey) -> bool {
        self.shared.in_progress.contains(key)
    }

    pub fn in_progress_count(&self) -> usize {
        self.shared.in_progress.len()
    }

    pub fn stats(&self) -> RendererStats {
        self.shared.counters.snapshot()
    }

    pub fn is_exiting(&self) -> bool {
        self.shared.is_exiting()
    }

    /// Stop the render threads.
    ///
    /// Running requests stop at their next checkpoint without returning
    /// targets to the pool. Graphics contexts are dropped once every thread
    /// has finished its finalize hooks.
    pub fn shutdown(&mut self) {
        if self.shared.exiting.swap(true, Ordering::AcqRel) {
            return;
        }

        self.queue.cancel_pending();
        self.queue.shutdown();

        for thread in &self.shared.threads {
            thread.lock_context().take();
        }
        log::info!("tile renderer stopped");
    }
}

impl Drop for TileRenderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::Rect;
    use crate::rendering::headless::{ContextOp, HeadlessBackend};
    use crate::rendering::pool::TexturePool;
    use crate::renderer::PaintEvent;
    use crate::core::transform::ScreenTransform;
    use std::sync::atomic::AtomicUsize;

    struct CountingRenderer {
        calls: AtomicUsize,
    }

    impl Renderer for CountingRenderer {
        fn render(
            &self,
            event: &mut PaintEvent<'_>,
            _transform: &ScreenTransform,
            _select_rect: &Rect,
            _clip_rect: &Rect,
            _detail_level: u8,
            _within_upper_level: bool,
        ) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            event.set_empty_drawing(false);
        }
    }

    fn world() -> Rect {
        Rect::new(0.0, 0.0, 1024.0, 1024.0)
    }

    fn setup(config: RendererConfig) -> (TileRenderer, Arc<CountingRenderer>, Arc<TexturePool>, HeadlessBackend) {
        let renderer = Arc::new(CountingRenderer { calls: AtomicUsize::new(0) });
        let pool = Arc::new(TexturePool::new(256, 256, 8));
        let backend = HeadlessBackend::new();
        let tiles = TileRenderer::new(config, renderer.clone(), pool.clone(), &backend).unwrap();
        (tiles, renderer, pool, backend)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let pool: Arc<dyn ResourcePool> = Arc::new(TexturePool::new(256, 256, 1));
        let renderer = Arc::new(CountingRenderer { calls: AtomicUsize::new(0) });
        let result = TileRenderer::new(
            RendererConfig::default().with_workers(0),
            renderer,
            pool,
            &HeadlessBackend::new(),
        );
        assert!(matches!(result, Err(crate::Error::InvalidConfig(_))));
    }

    #[test]
    fn test_thread_hooks_bind_and_release_contexts() {
        let (mut tiles, _renderer, pool, backend) = setup(RendererConfig::default().with_workers(2));
        tiles.shutdown();

        for thread_num in 0..2 {
            let ops = backend.ops_for(thread_num);
            assert_eq!(ops.first(), Some(&ContextOp::MakeCurrent));
            assert_eq!(ops.get(1), Some(&ContextOp::AttachDepthBuffer(256, 256)));
            assert_eq!(ops.last(), Some(&ContextOp::EndThreadDrawing));
        }
        assert_eq!(pool.stats().scratch_targets, 2);
        assert!(tiles.is_exiting());
    }

    #[test]
    fn test_submit_renders_and_caches() {
        let (tiles, renderer, pool, _backend) = setup(RendererConfig::default().with_workers(1));
        let key = TileKey::from_grid(&world(), 2, 1, 1);

        tiles.submit_tile(key, 1, Chain::new()).unwrap();
        tiles.wait_until_idle();

        let cache = tiles.cache_snapshot();
        let cache = cache.lock().unwrap();
        let tile = cache.peek_tile(&key).unwrap();
        assert!(!tile.is_empty_drawing);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().outstanding, 1);
        assert_eq!(tiles.stats().committed, 1);
        assert_eq!(tiles.sequence_id(), 1);
    }

    #[test]
    fn test_paused_renderer_still_runs_continuation() {
        let (tiles, renderer, _pool, _backend) = setup(RendererConfig::default().with_workers(1));
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        tiles.pause(true);
        assert!(tiles.is_paused());
        tiles
            .submit_tile(
                TileKey::from_grid(&world(), 2, 0, 0),
                1,
                Chain::new().with_command(move |_| flag.store(true, Ordering::SeqCst)),
            )
            .unwrap();
        tiles.wait_until_idle();

        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(tiles.stats().paused, 1);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let (mut tiles, _renderer, _pool, _backend) = setup(RendererConfig::default());
        tiles.shutdown();
        let result = tiles.submit_tile(TileKey::from_grid(&world(), 1, 0, 0), 1, Chain::new());
        assert!(matches!(result, Err(crate::Error::QueueClosed)));
    }
}
