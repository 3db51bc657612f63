//! Pre-allocated frame buffer pool.
//!
//! All buffers are allocated once at device-open time, sized to the
//! worst-case frame the sensor can produce, and recycled for the life of
//! the connection. A buffer is either resident in the pool or moved out
//! into a pending delivery event; the move makes aliasing impossible. The
//! acquisition side never blocks: when no buffer is free the frame is
//! dropped and counted, which is the backpressure policy that keeps the
//! controller thread responsive to commands.

use std::sync::Mutex;

use crate::error::{CamResult, CameraError};

/// One owned frame buffer. Storage is fixed at construction and never
/// reallocated per frame.
#[derive(Debug)]
pub struct FrameBuffer {
    data: Vec<u8>,
}

impl FrameBuffer {
    fn with_capacity(capacity: usize) -> CamResult<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|e| CameraError::MemAlloc(format!("frame buffer of {capacity} bytes: {e}")))?;
        data.resize(capacity, 0);
        Ok(FrameBuffer { data })
    }

    /// Total writable capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access for the acquisition path.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

struct PoolState {
    slots: Vec<Option<FrameBuffer>>,
    free: usize,
    next: usize,
}

/// Fixed pool of `N` frame buffers shared between the controller thread
/// (acquire) and the callback dispatch thread (release).
pub struct BufferPool {
    state: Mutex<PoolState>,
    count: usize,
}

impl BufferPool {
    /// Allocates `count` buffers of `capacity` bytes each. Fails with
    /// `MemAlloc` without leaking the buffers already allocated.
    pub fn new(count: usize, capacity: usize) -> CamResult<Self> {
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            slots.push(Some(FrameBuffer::with_capacity(capacity)?));
        }
        Ok(BufferPool {
            state: Mutex::new(PoolState {
                slots,
                free: count,
                next: 0,
            }),
            count,
        })
    }

    /// Number of buffers in the pool.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Buffers currently resident (not out for delivery).
    pub fn free_count(&self) -> usize {
        self.state.lock().unwrap().free
    }

    /// Takes the next free buffer out of the pool, or `None` when every
    /// buffer is out for delivery. Checked, never blocking.
    pub fn acquire(&self) -> Option<(usize, FrameBuffer)> {
        let mut state = self.state.lock().unwrap();
        if state.free == 0 {
            return None;
        }
        // Buffers are released in delivery order, so the scan from `next`
        // normally hits an occupied slot immediately.
        for offset in 0..self.count {
            let index = (state.next + offset) % self.count;
            if let Some(buffer) = state.slots[index].take() {
                state.free -= 1;
                state.next = (index + 1) % self.count;
                return Some((index, buffer));
            }
        }
        None
    }

    /// Returns a buffer to its slot. Called exactly once per acquisition,
    /// by the dispatch thread after the application callback returns, or
    /// by the controller when an acquired buffer received no frame.
    pub fn release(&self, index: usize, buffer: FrameBuffer) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.slots[index].is_none(), "double release of buffer {index}");
        state.slots[index] = Some(buffer);
        state.free += 1;
        debug_assert!(state.free <= self.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_sizes_every_buffer() {
        let pool = BufferPool::new(4, 1024).unwrap();
        assert_eq!(pool.count(), 4);
        assert_eq!(pool.free_count(), 4);
        let (_, buf) = pool.acquire().unwrap();
        assert_eq!(buf.capacity(), 1024);
    }

    #[test]
    fn free_count_moves_by_one_per_acquire_and_release() {
        let pool = BufferPool::new(3, 16).unwrap();
        let mut out = Vec::new();
        for expected in (0..3).rev() {
            out.push(pool.acquire().unwrap());
            assert_eq!(pool.free_count(), expected);
        }
        assert!(pool.acquire().is_none());
        assert_eq!(pool.free_count(), 0);
        for (expected, (index, buffer)) in out.drain(..).enumerate() {
            pool.release(index, buffer);
            assert_eq!(pool.free_count(), expected + 1);
        }
    }

    #[test]
    fn acquisition_order_is_circular() {
        let pool = BufferPool::new(2, 8).unwrap();
        let (i0, b0) = pool.acquire().unwrap();
        let (i1, b1) = pool.acquire().unwrap();
        assert_eq!((i0, i1), (0, 1));
        pool.release(i0, b0);
        pool.release(i1, b1);
        let (i2, _) = pool.acquire().unwrap();
        assert_eq!(i2, 0);
    }

    #[test]
    fn release_after_out_of_order_timeout_is_found_again() {
        let pool = BufferPool::new(2, 8).unwrap();
        let (i0, b0) = pool.acquire().unwrap();
        // Timeout path: buffer goes straight back while `next` has moved on.
        pool.release(i0, b0);
        let (i1, _) = pool.acquire().unwrap();
        assert_eq!(i1, 1);
        let (i2, _) = pool.acquire().unwrap();
        assert_eq!(i2, 0);
    }
}
