//! Process-wide pool of byte buffers used for pixel readback.
//!
//! Every tile of a given size needs the same scratch buffer for the few
//! microseconds of a readback, so buffers are recycled by size instead of
//! being allocated per tile.

use crate::core::constants::MAX_SHARED_BUFFERS_PER_SIZE;
use crate::prelude::HashMap;
use once_cell::sync::Lazy;
use std::sync::{Mutex, PoisonError};

static SHARED_BUFFERS: Lazy<SharedBufferPool> = Lazy::new(SharedBufferPool::default);

pub struct SharedBufferPool {
    buffers: Mutex<HashMap<usize, Vec<Vec<u8>>>>,
    max_per_size: usize,
}

impl SharedBufferPool {
    pub fn new(max_per_size: usize) -> Self {
        Self {
            buffers: Mutex::new(HashMap::default()),
            max_per_size,
        }
    }

    /// The process-wide instance
    pub fn instance() -> &'static SharedBufferPool {
        &SHARED_BUFFERS
    }

    /// Take a zero-initialised or recycled buffer of exactly `size` bytes
    pub fn reserve(&self, size: usize) -> Vec<u8> {
        let recycled = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&size)
            .and_then(Vec::pop);
        recycled.unwrap_or_else(|| vec![0; size])
    }

    /// Give a buffer back. Buffers of the wrong size or beyond the per-size
    /// limit are dropped.
    pub fn free(&self, size: usize, buffer: Vec<u8>) {
        if buffer.len() != size {
            return;
        }
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        let pooled = buffers.entry(size).or_default();
        if pooled.len() < self.max_per_size {
            pooled.push(buffer);
        }
    }

    /// Buffers currently waiting for reuse
    pub fn pooled_count(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }
}

impl Default for SharedBufferPool {
    fn default() -> Self {
        Self::new(MAX_SHARED_BUFFERS_PER_SIZE)
    }
}
