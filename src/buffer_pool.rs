//! Buffer Pool Module
//!
//! This module provides the block-scoped scratch memory used by the render
//! stages. All buffers are allocated up front; the audio thread checks one
//! out, uses it for the current block, and the checkout guard returns it on
//! drop. When every slot is taken the pool hands back `None` and the caller
//! skips its stage for the block instead of allocating or waiting.
//!
//! Checkout bookkeeping is a plain borrow flag per slot; the pool is meant
//! to be driven from the single realtime thread that renders voices.

use std::cell::{RefCell, RefMut};
use std::ops::{Deref, DerefMut};

/// Scoped checkout of a float scratch span.
pub struct BufferGuard<'a> {
    inner: RefMut<'a, Vec<f32>>,
    len: usize,
}

impl Deref for BufferGuard<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.inner[..self.len]
    }
}

impl DerefMut for BufferGuard<'_> {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.inner[..self.len]
    }
}

/// Scoped checkout of an integer index scratch span.
pub struct IndexBufferGuard<'a> {
    inner: RefMut<'a, Vec<i32>>,
    len: usize,
}

impl Deref for IndexBufferGuard<'_> {
    type Target = [i32];

    fn deref(&self) -> &[i32] {
        &self.inner[..self.len]
    }
}

impl DerefMut for IndexBufferGuard<'_> {
    fn deref_mut(&mut self) -> &mut [i32] {
        &mut self.inner[..self.len]
    }
}

/// Bounded pool of pre-allocated scratch buffers.
#[derive(Debug)]
pub struct BufferPool {
    float_slots: Vec<RefCell<Vec<f32>>>,
    index_slots: Vec<RefCell<Vec<i32>>>,
    max_frames: usize,
}

impl BufferPool {
    /// Allocates the pool.
    ///
    /// # Arguments
    ///
    /// * `float_slots` - Number of float scratch buffers
    /// * `index_slots` - Number of integer scratch buffers
    /// * `max_frames` - Capacity of each buffer in frames
    pub fn new(float_slots: usize, index_slots: usize, max_frames: usize) -> Self {
        log::debug!(
            "buffer pool: {} float + {} index slots, {} frames each",
            float_slots,
            index_slots,
            max_frames
        );
        Self {
            float_slots: (0..float_slots)
                .map(|_| RefCell::new(vec![0.0; max_frames]))
                .collect(),
            index_slots: (0..index_slots)
                .map(|_| RefCell::new(vec![0; max_frames]))
                .collect(),
            max_frames,
        }
    }

    /// Grows every slot to a new maximum block size. Not realtime-safe;
    /// call only while rendering is paused.
    pub fn resize(&mut self, max_frames: usize) {
        for slot in &self.float_slots {
            slot.borrow_mut().resize(max_frames, 0.0);
        }
        for slot in &self.index_slots {
            slot.borrow_mut().resize(max_frames, 0);
        }
        self.max_frames = max_frames;
    }

    /// Checks out a zeroed float span of `len` frames, or `None` when the
    /// pool is exhausted or the request exceeds the slot capacity.
    pub fn get_buffer(&self, len: usize) -> Option<BufferGuard<'_>> {
        if len > self.max_frames {
            return None;
        }
        for slot in &self.float_slots {
            if let Ok(mut inner) = slot.try_borrow_mut() {
                inner[..len].fill(0.0);
                return Some(BufferGuard { inner, len });
            }
        }
        None
    }

    /// Checks out a zeroed index span of `len` frames.
    pub fn get_index_buffer(&self, len: usize) -> Option<IndexBufferGuard<'_>> {
        if len > self.max_frames {
            return None;
        }
        for slot in &self.index_slots {
            if let Ok(mut inner) = slot.try_borrow_mut() {
                inner[..len].fill(0);
                return Some(IndexBufferGuard { inner, len });
            }
        }
        None
    }

    /// Capacity of each slot in frames.
    pub fn max_frames(&self) -> usize {
        self.max_frames
    }
}
