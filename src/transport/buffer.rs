//! Packet buffer pool.
//!
//! Stands in for the host's packet memory pool: a bounded number of
//! fixed-size buffers, handed out without blocking and returned on drop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::error::{Error, Result};

/// Default buffer size: a maximum-length Ethernet frame.
pub const DEFAULT_BUFFER_SIZE: usize = 1518;

/// A reusable packet buffer.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    data: Vec<u8>,
    len: usize,
}

impl PacketBuffer {
    /// Create a buffer with specific capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            len: 0,
        }
    }

    /// Get the buffer data as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Get the buffer data as a mutable slice (full capacity).
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Set the length of valid data, clamped to capacity.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.data.len());
    }

    /// Get the length of valid data.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the capacity.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Copy data into the buffer, truncating to capacity.
    pub fn copy_from(&mut self, data: &[u8]) {
        let len = data.len().min(self.data.len());
        self.data[..len].copy_from_slice(&data[..len]);
        self.len = len;
    }
}

/// Bounded pool of reusable buffers.
#[derive(Debug)]
pub struct BufferPool {
    pool: ArrayQueue<PacketBuffer>,
    buffer_size: usize,
    allocated: AtomicUsize,
    max_buffers: usize,
}

impl BufferPool {
    /// Create a new buffer pool.
    ///
    /// # Arguments
    /// * `initial_count` - Number of buffers to pre-allocate
    /// * `max_count` - Most buffers that may exist at once
    /// * `buffer_size` - Size of each buffer
    pub fn new(initial_count: usize, max_count: usize, buffer_size: usize) -> Arc<Self> {
        let max_count = max_count.max(1);
        let initial_count = initial_count.min(max_count);
        let pool = ArrayQueue::new(max_count);

        for _ in 0..initial_count {
            let _ = pool.push(PacketBuffer::with_capacity(buffer_size));
        }

        Arc::new(Self {
            pool,
            buffer_size,
            allocated: AtomicUsize::new(initial_count),
            max_buffers: max_count,
        })
    }

    /// Pool sized for `max_count` frames of the default size.
    pub fn with_max(max_count: usize) -> Arc<Self> {
        Self::new(max_count.min(64), max_count, DEFAULT_BUFFER_SIZE)
    }

    /// Get a buffer from the pool without blocking.
    ///
    /// Fails with [`Error::BufferExhausted`] once `max_count` buffers are out.
    pub fn try_get(self: &Arc<Self>) -> Result<PooledBuffer> {
        let buffer = match self.pool.pop() {
            Some(buffer) => buffer,
            None => {
                self.allocated
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < self.max_buffers).then_some(n + 1)
                    })
                    .map_err(|_| Error::BufferExhausted)?;
                PacketBuffer::with_capacity(self.buffer_size)
            }
        };

        Ok(PooledBuffer {
            buffer,
            pool: Arc::clone(self),
        })
    }

    /// Return a buffer to the pool.
    fn return_buffer(&self, mut buffer: PacketBuffer) {
        buffer.clear();
        if self.pool.push(buffer).is_err() {
            // Pool is full, drop the buffer
            self.allocated.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Buffers currently handed out.
    pub fn in_use(&self) -> usize {
        self.allocated
            .load(Ordering::Acquire)
            .saturating_sub(self.pool.len())
    }

    /// Get pool statistics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            available: self.pool.len(),
            allocated: self.allocated.load(Ordering::Relaxed),
            max: self.max_buffers,
            buffer_size: self.buffer_size,
        }
    }
}

/// A buffer that automatically returns to its pool when dropped.
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: PacketBuffer,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    fn inner(&self) -> &PacketBuffer {
        &self.buffer
    }

    fn inner_mut(&mut self) -> &mut PacketBuffer {
        &mut self.buffer
    }

    /// Get the valid data as a slice.
    pub fn as_slice(&self) -> &[u8] {
        self.inner().as_slice()
    }

    /// Get the full buffer as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.inner_mut().as_mut_slice()
    }

    /// Set the length of valid data.
    pub fn set_len(&mut self, len: usize) {
        self.inner_mut().set_len(len);
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.inner().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.inner().is_empty()
    }

    /// Copy data into the buffer.
    pub fn copy_from(&mut self, data: &[u8]) {
        self.inner_mut().copy_from(data);
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        self.pool.return_buffer(buffer);
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

/// Pool statistics.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub available: usize,
    pub allocated: usize,
    pub max: usize,
    pub buffer_size: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "available={}/{} allocated={} buffer_size={}",
            self.available, self.max, self.allocated, self.buffer_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_buffer() {
        let mut buf = PacketBuffer::with_capacity(64);
        buf.copy_from(b"hello world");
        assert_eq!(buf.len(), 11);
        assert_eq!(buf.as_slice(), b"hello world");

        buf.set_len(1000);
        assert_eq!(buf.len(), 64);
    }

    #[test]
    fn test_buffer_pool() {
        let pool = BufferPool::new(2, 4, 1024);

        let mut buf1 = pool.try_get().unwrap();
        buf1.copy_from(b"test");
        assert_eq!(buf1.len(), 4);

        let _buf2 = pool.try_get().unwrap();
        let stats = pool.stats();
        assert_eq!(stats.available, 0);
        assert_eq!(stats.allocated, 2);
        assert_eq!(pool.in_use(), 2);

        drop(buf1);
        let stats = pool.stats();
        assert_eq!(stats.available, 1);
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn test_returned_buffer_is_cleared() {
        let pool = BufferPool::new(1, 1, 64);
        let mut buf = pool.try_get().unwrap();
        buf.copy_from(b"stale");
        drop(buf);

        let buf = pool.try_get().unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_pool_exhaustion() {
        let pool = BufferPool::new(0, 2, 64);
        let a = pool.try_get().unwrap();
        let _b = pool.try_get().unwrap();

        assert!(matches!(pool.try_get(), Err(Error::BufferExhausted)));

        drop(a);
        assert!(pool.try_get().is_ok());
    }
}
