pub mod buffers;
pub mod headless;
pub mod pool;
#[cfg(feature = "render")]
pub mod resources;

// Re-export main types
pub use buffers::SharedBufferPool;
pub use headless::{ContextOp, HeadlessBackend, HeadlessContext, Journal, RecordingQueue};
pub use pool::{HeadlessAllocator, PoolStats, TextureAllocator, TexturePool};
#[cfg(feature = "render")]
pub use resources::GpuTextureAllocator;
