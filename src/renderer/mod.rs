//! Tile rendering orchestration: request admission, drawing on the render
//! threads and publication into the tile cache.

mod pipeline;
pub mod tile_renderer;

pub use tile_renderer::TileRenderer;

use crate::background::queue::Environment;
use crate::tiles::info_layer::InfoLayer;
use crate::traits::WorkerContext;
use std::sync::atomic::{AtomicU64, Ordering};

/// Drawing surface handed to a [`crate::traits::Renderer`] for one tile
pub struct PaintEvent<'a> {
    context: &'a mut dyn WorkerContext,
    info_layer: &'a mut InfoLayer,
    env: &'a Environment,
    empty_drawing: bool,
}

impl<'a> PaintEvent<'a> {
    pub fn new(
        context: &'a mut dyn WorkerContext,
        info_layer: &'a mut InfoLayer,
        env: &'a Environment,
    ) -> Self {
        Self {
            context,
            info_layer,
            env,
            empty_drawing: true,
        }
    }

    /// Graphics context of the executing render thread, bound to the tile
    pub fn context(&mut self) -> &mut dyn WorkerContext {
        &mut *self.context
    }

    /// Overlay placements produced alongside the pixels, in tile pixels
    pub fn info_layer(&mut self) -> &mut InfoLayer {
        &mut *self.info_layer
    }

    /// Checked by long-running renderers to stop early
    pub fn is_cancelled(&self) -> bool {
        self.env.is_cancelled()
    }

    pub fn thread_num(&self) -> usize {
        self.env.thread_num()
    }

    /// Report whether anything beyond the background was drawn
    pub fn set_empty_drawing(&mut self, empty: bool) {
        self.empty_drawing = empty;
    }

    pub fn is_empty_drawing(&self) -> bool {
        self.empty_drawing
    }
}

/// How a tile request ended. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileOutcome {
    /// Rendered and published to the cache
    Committed,
    /// Rendered, but another copy was already cached; the new texture went
    /// back to the pool
    Duplicate,
    /// Rendering is paused
    Paused,
    /// The chain was cancelled before admission
    Cancelled,
    /// The request belongs to an older view
    Stale,
    /// Already in the cache; only its recency was updated
    AlreadyCached,
    /// Another thread is already rendering the tile
    InProgress,
    /// The resource pool gave no render target
    ResourceUnavailable,
    /// Cancelled or made stale during rendering; the target was released
    Abandoned,
    ShuttingDown,
}

impl TileOutcome {
    const COUNT: usize = 10;

    fn index(self) -> usize {
        match self {
            Self::Committed => 0,
            Self::Duplicate => 1,
            Self::Paused => 2,
            Self::Cancelled => 3,
            Self::Stale => 4,
            Self::AlreadyCached => 5,
            Self::InProgress => 6,
            Self::ResourceUnavailable => 7,
            Self::Abandoned => 8,
            Self::ShuttingDown => 9,
        }
    }

    /// Whether a texture ended up in the cache
    pub fn is_committed(self) -> bool {
        self == Self::Committed
    }
}

/// Outcome counters of a [`TileRenderer`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    pub committed: u64,
    pub duplicates: u64,
    pub paused: u64,
    pub cancelled: u64,
    pub stale: u64,
    pub already_cached: u64,
    pub in_progress: u64,
    pub resource_unavailable: u64,
    pub abandoned: u64,
    pub shutting_down: u64,
}

impl RendererStats {
    /// Requests that reached an outcome
    pub fn total(&self) -> u64 {
        self.committed
            + self.duplicates
            + self.paused
            + self.cancelled
            + self.stale
            + self.already_cached
            + self.in_progress
            + self.resource_unavailable
            + self.abandoned
            + self.shutting_down
    }
}

#[derive(Debug, Default)]
pub(crate) struct OutcomeCounters {
    counts: [AtomicU64; TileOutcome::COUNT],
}

impl OutcomeCounters {
    pub(crate) fn record(&self, outcome: TileOutcome) {
        self.counts[outcome.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RendererStats {
        let get = |outcome: TileOutcome| self.counts[outcome.index()].load(Ordering::Relaxed);
        RendererStats {
            committed: get(TileOutcome::Committed),
            duplicates: get(TileOutcome::Duplicate),
            paused: get(TileOutcome::Paused),
            cancelled: get(TileOutcome::Cancelled),
            stale: get(TileOutcome::Stale),
            already_cached: get(TileOutcome::AlreadyCached),
            in_progress: get(TileOutcome::InProgress),
            resource_unavailable: get(TileOutcome::ResourceUnavailable),
            abandoned: get(TileOutcome::Abandoned),
            shutting_down: get(TileOutcome::ShuttingDown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::headless::HeadlessBackend;
    use crate::traits::GraphicsBackend;

    #[test]
    fn test_paint_event_defaults_to_empty_drawing() {
        let backend = HeadlessBackend::new();
        let mut context = backend.create_worker_context(0);
        let mut info_layer = InfoLayer::new();
        let env = Environment::new(3);

        let mut event = PaintEvent::new(context.as_mut(), &mut info_layer, &env);
        assert!(event.is_empty_drawing());
        assert_eq!(event.thread_num(), 3);

        event.set_empty_drawing(false);
        assert!(!event.is_empty_drawing());

        env.cancel();
        assert!(event.is_cancelled());
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = OutcomeCounters::default();
        counters.record(TileOutcome::Committed);
        counters.record(TileOutcome::Committed);
        counters.record(TileOutcome::Stale);

        let stats = counters.snapshot();
        assert_eq!(stats.committed, 2);
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.total(), 3);
        assert!(TileOutcome::Committed.is_committed());
        assert!(!TileOutcome::Duplicate.is_committed());
    }
}
