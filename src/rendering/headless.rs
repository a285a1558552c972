//! Headless graphics backend.
//!
//! Contexts record the operations issued to them instead of talking to a GPU,
//! which is enough to run the full tile pipeline in tests and on servers
//! without a display.

use crate::core::geo::{Color, Rect};
use crate::traits::{GraphicsBackend, GraphicsQueue, TextureHandle, WorkerContext};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Operation issued to a [`HeadlessContext`]
#[derive(Debug, Clone, PartialEq)]
pub enum ContextOp {
    MakeCurrent,
    EndThreadDrawing,
    AttachDepthBuffer(u32, u32),
    BindScratch(u64),
    SetRenderTarget(u64),
    UnbindRenderTarget,
    BeginFrame,
    Clear(Color),
    SetClipRect(Rect),
    EndFrame,
    Finish,
    ReadPixels(Rect),
}

/// Operations of every context, tagged with the thread that issued them
pub type Journal = Arc<Mutex<Vec<(usize, ContextOp)>>>;

pub struct HeadlessContext {
    thread_num: usize,
    journal: Journal,
    bound_target: Option<u64>,
    clear_color: Color,
}

impl HeadlessContext {
    pub fn new(thread_num: usize, journal: Journal) -> Self {
        Self {
            thread_num,
            journal,
            bound_target: None,
            clear_color: Color::rgba(0, 0, 0, 0),
        }
    }

    pub fn thread_num(&self) -> usize {
        self.thread_num
    }

    /// Render target currently bound, if any
    pub fn bound_target(&self) -> Option<u64> {
        self.bound_target
    }

    fn record(&self, op: ContextOp) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((self.thread_num, op));
    }
}

impl WorkerContext for HeadlessContext {
    fn make_current(&mut self) {
        self.record(ContextOp::MakeCurrent);
    }

    fn end_thread_drawing(&mut self) {
        self.record(ContextOp::EndThreadDrawing);
    }

    fn attach_depth_buffer(&mut self, width: u32, height: u32) {
        self.record(ContextOp::AttachDepthBuffer(width, height));
    }

    fn bind_scratch_target(&mut self, scratch: &TextureHandle) {
        self.record(ContextOp::BindScratch(scratch.id()));
    }

    fn set_render_target(&mut self, target: &TextureHandle) {
        self.bound_target = Some(target.id());
        self.record(ContextOp::SetRenderTarget(target.id()));
    }

    fn unbind_render_target(&mut self) {
        self.bound_target = None;
        self.record(ContextOp::UnbindRenderTarget);
    }

    fn begin_frame(&mut self) {
        self.record(ContextOp::BeginFrame);
    }

    fn clear(&mut self, color: Color) {
        self.clear_color = color;
        self.record(ContextOp::Clear(color));
    }

    fn set_clip_rect(&mut self, rect: &Rect) {
        self.record(ContextOp::SetClipRect(*rect));
    }

    fn end_frame(&mut self) {
        self.record(ContextOp::EndFrame);
    }

    fn finish(&mut self) {
        self.record(ContextOp::Finish);
    }

    fn read_pixels(&mut self, rect: &Rect, buffer: &mut [u8]) {
        let pixel = self.clear_color.to_array();
        for chunk in buffer.chunks_exact_mut(pixel.len()) {
            chunk.copy_from_slice(&pixel);
        }
        self.record(ContextOp::ReadPixels(*rect));
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Command queue that runs submitted functions inline and counts signals
#[derive(Debug, Default)]
pub struct RecordingQueue {
    completed: AtomicUsize,
    cancelled: AtomicUsize,
    processed: AtomicUsize,
}

impl RecordingQueue {
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }
}

impl GraphicsQueue for RecordingQueue {
    fn complete_commands(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel_commands(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    fn process_fn(&self, f: Box<dyn FnOnce() + Send>, _immediate: bool) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        f();
    }
}

/// Backend creating [`HeadlessContext`]s that share one journal
#[derive(Default)]
pub struct HeadlessBackend {
    journal: Journal,
    queues: Vec<Arc<RecordingQueue>>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give each of the first `count` threads its own recording queue
    pub fn with_queues(count: usize) -> Self {
        Self {
            journal: Journal::default(),
            queues: (0..count).map(|_| Arc::new(RecordingQueue::default())).collect(),
        }
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Operations issued by thread `thread_num`, in order
    pub fn ops_for(&self, thread_num: usize) -> Vec<ContextOp> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(thread, _)| *thread == thread_num)
            .map(|(_, op)| op.clone())
            .collect()
    }

    pub fn queue(&self, thread_num: usize) -> Option<Arc<RecordingQueue>> {
        self.queues.get(thread_num).cloned()
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn create_worker_context(&self, thread_num: usize) -> Box<dyn WorkerContext> {
        Box::new(HeadlessContext::new(thread_num, self.journal.clone()))
    }

    fn graphics_queue(&self, thread_num: usize) -> Option<Arc<dyn GraphicsQueue>> {
        self.queue(thread_num)
            .map(|queue| queue as Arc<dyn GraphicsQueue>)
    }
}
