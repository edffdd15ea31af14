//! Bounded frame queues between the worker loops.

use crossbeam_queue::ArrayQueue;

use super::PooledBuffer;
use crate::error::{Error, Result};
use crate::metrics::Counter;

/// Fixed-capacity, non-blocking FIFO of frames.
///
/// A full queue never blocks the producer: [`push`](Self::push) hands the
/// frame back, [`push_or_drop`](Self::push_or_drop) retries once and then
/// drops it.
#[derive(Debug)]
pub struct FrameQueue {
    name: &'static str,
    ring: ArrayQueue<PooledBuffer>,
    dropped: Counter,
}

impl FrameQueue {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            ring: ArrayQueue::new(capacity.max(1)),
            dropped: Counter::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enqueue, returning the frame if the queue is full.
    pub fn push(&self, frame: PooledBuffer) -> std::result::Result<(), PooledBuffer> {
        self.ring.push(frame)
    }

    /// Enqueue with one retry; a frame that still does not fit is dropped
    /// and counted.
    pub fn push_or_drop(&self, frame: PooledBuffer) -> Result<()> {
        let frame = match self.ring.push(frame) {
            Ok(()) => return Ok(()),
            Err(frame) => frame,
        };

        match self.ring.push(frame) {
            Ok(()) => Ok(()),
            Err(_frame) => {
                self.dropped.inc();
                Err(Error::QueueFull { queue: self.name })
            }
        }
    }

    pub fn pop(&self) -> Option<PooledBuffer> {
        self.ring.pop()
    }

    /// Dequeue up to `max` frames into `out`. Returns how many were taken.
    pub fn pop_burst(&self, out: &mut Vec<PooledBuffer>, max: usize) -> usize {
        let mut taken = 0;
        while taken < max {
            match self.ring.pop() {
                Some(frame) => {
                    out.push(frame);
                    taken += 1;
                }
                None => break,
            }
        }
        taken
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Frames dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BufferPool;

    #[test]
    fn test_fifo_order() {
        let pool = BufferPool::new(4, 4, 16);
        let queue = FrameQueue::new("ingress", 4);

        for i in 0..3u8 {
            let mut frame = pool.try_get().unwrap();
            frame.copy_from(&[i]);
            queue.push_or_drop(frame).unwrap();
        }

        let mut out = Vec::new();
        assert_eq!(queue.pop_burst(&mut out, 2), 2);
        assert_eq!(out[0].as_slice(), &[0]);
        assert_eq!(out[1].as_slice(), &[1]);
        assert_eq!(queue.pop().unwrap().as_slice(), &[2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let pool = BufferPool::new(3, 3, 16);
        let queue = FrameQueue::new("egress", 2);

        queue.push_or_drop(pool.try_get().unwrap()).unwrap();
        queue.push_or_drop(pool.try_get().unwrap()).unwrap();

        let err = queue.push_or_drop(pool.try_get().unwrap()).unwrap_err();
        assert!(matches!(err, Error::QueueFull { queue: "egress" }));
        assert_eq!(queue.dropped(), 1);

        // the dropped frame went back to the pool
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn test_push_returns_frame_when_full() {
        let pool = BufferPool::new(2, 2, 16);
        let queue = FrameQueue::new("ingress", 1);

        queue.push(pool.try_get().unwrap()).unwrap();
        assert!(queue.push(pool.try_get().unwrap()).is_err());
        assert_eq!(queue.dropped(), 0);
    }
}
