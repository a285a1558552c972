//! Reference render-target pool.
//!
//! Hands out a fixed number of same-sized textures, recycling freed ones
//! instead of allocating new GPU memory. Reservation blocks while every
//! texture is in use and gives up when the pool is cancelled.

use crate::prelude::HashSet;
use crate::traits::{ResourcePool, TextureHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Backing storage for pool textures
pub trait TextureAllocator: Send + Sync {
    fn allocate(&self, id: u64, width: u32, height: u32);

    fn destroy(&self, _id: u64) {}
}

/// Allocator for pools that only track handles (tests, headless rendering)
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessAllocator;

impl TextureAllocator for HeadlessAllocator {
    fn allocate(&self, _id: u64, _width: u32, _height: u32) {}
}

/// Lifetime counters of a [`TexturePool`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Pooled textures allocated so far
    pub created: usize,
    pub reserved: u64,
    pub freed: u64,
    /// Reserved and not yet freed
    pub outstanding: usize,
    /// Frees of handles that were not outstanding
    pub double_frees: u64,
    pub scratch_targets: u64,
}

#[derive(Default)]
struct PoolState {
    free: Vec<u64>,
    outstanding: HashSet<u64>,
    next_id: u64,
    stats: PoolStats,
}

pub struct TexturePool {
    width: u32,
    height: u32,
    capacity: usize,
    state: Mutex<PoolState>,
    available: Condvar,
    cancelled: AtomicBool,
    allocator: Box<dyn TextureAllocator>,
}

impl TexturePool {
    /// Pool of at most `capacity` textures of `width`×`height` pixels
    pub fn new(width: u32, height: u32, capacity: usize) -> Self {
        Self::with_allocator(width, height, capacity, Box::new(HeadlessAllocator))
    }

    pub fn with_allocator(
        width: u32,
        height: u32,
        capacity: usize,
        allocator: Box<dyn TextureAllocator>,
    ) -> Self {
        Self {
            width,
            height,
            capacity: capacity.max(1),
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
            cancelled: AtomicBool::new(false),
            allocator,
        }
    }

    fn locked(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Textures that can be reserved without blocking
    pub fn available(&self) -> usize {
        let state = self.locked();
        state.free.len() + self.capacity.saturating_sub(state.stats.created)
    }

    /// Wake every blocked reservation and make it return `None`.
    /// Stays in effect until [`TexturePool::resume`].
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        // taking the lock orders the flag before any waiter's re-check
        let _state = self.locked();
        self.available.notify_all();
    }

    pub fn resume(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.locked();
        PoolStats {
            outstanding: state.outstanding.len(),
            ..state.stats
        }
    }
}

impl ResourcePool for TexturePool {
    fn render_target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn reserve_render_target(&self) -> Option<TextureHandle> {
        let mut state = self.locked();
        let id = loop {
            if self.cancelled.load(Ordering::Acquire) {
                return None;
            }
            if let Some(id) = state.free.pop() {
                break id;
            }
            if state.stats.created < self.capacity {
                let id = state.next_id;
                state.next_id += 1;
                state.stats.created += 1;
                self.allocator.allocate(id, self.width, self.height);
                break id;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        };

        state.outstanding.insert(id);
        state.stats.reserved += 1;
        Some(TextureHandle::new(id, self.width, self.height))
    }

    fn free_render_target(&self, texture: TextureHandle) {
        let mut state = self.locked();
        if !state.outstanding.remove(&texture.id()) {
            state.stats.double_frees += 1;
            log::error!("render target {} freed while not reserved", texture.id());
            return;
        }
        state.free.push(texture.id());
        state.stats.freed += 1;
        self.available.notify_one();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn create_scratch_target(&self, width: u32, height: u32) -> TextureHandle {
        let mut state = self.locked();
        let id = state.next_id;
        state.next_id += 1;
        state.stats.scratch_targets += 1;
        self.allocator.allocate(id, width, height);
        TextureHandle::new(id, width, height)
    }
}

impl Drop for TexturePool {
    fn drop(&mut self) {
        let state = self.locked();
        for id in state.free.iter().chain(state.outstanding.iter()) {
            self.allocator.destroy(*id);
        }
    }
}
