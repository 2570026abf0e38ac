//! Encode Buffer Pool
//!
//! Size-classed reusable encode buffers. A checked-out buffer returns its
//! storage to the pool when dropped, so the buffer-growth retry loop gives
//! back each undersized buffer before asking for the next class.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

use crate::application::ports::EncodeBuffer;

/// Buffers kept per size class.
const MAX_CACHED_PER_CLASS: usize = 16;

/// Pool of encode buffers in power-of-two size classes.
#[derive(Debug)]
pub struct BufferPool {
    class_sizes: Vec<usize>,
    classes: Vec<Mutex<Vec<Vec<u8>>>>,
}

impl BufferPool {
    /// Pool with classes doubling from `min_size` up to at least `max_size`.
    #[must_use]
    pub fn new(min_size: usize, max_size: usize) -> Self {
        let min_size = min_size.max(1);
        let mut class_sizes = vec![min_size];

        while let Some(&last) = class_sizes.last() {
            if last >= max_size {
                break;
            }
            class_sizes.push(last.saturating_mul(2));
        }

        let classes = class_sizes.iter().map(|_| Mutex::new(Vec::new())).collect();

        Self {
            class_sizes,
            classes,
        }
    }

    /// An empty buffer limited to `limit` bytes.
    ///
    /// Limits above the largest class get a one-off allocation that is not
    /// returned to the pool.
    #[must_use]
    pub fn checkout(&self, limit: usize) -> PooledBuffer<'_> {
        let class = self.class_sizes.iter().position(|&size| size >= limit);

        let storage = class
            .and_then(|index| self.classes[index].lock().pop())
            .unwrap_or_else(|| Vec::with_capacity(class.map_or(limit, |index| self.class_sizes[index])));

        PooledBuffer {
            pool: self,
            class,
            buffer: EncodeBuffer::from_vec(storage, limit),
        }
    }

    /// Number of idle buffers held.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.classes.iter().map(|class| class.lock().len()).sum()
    }

    /// Size of each class, smallest first.
    #[must_use]
    pub fn class_sizes(&self) -> &[usize] {
        &self.class_sizes
    }

    fn give_back(&self, class: usize, storage: Vec<u8>) {
        let mut idle = self.classes[class].lock();
        if idle.len() < MAX_CACHED_PER_CLASS {
            idle.push(storage);
        }
    }
}

/// Buffer on loan from a [`BufferPool`].
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    class: Option<usize>,
    buffer: EncodeBuffer,
}

impl Deref for PooledBuffer<'_> {
    type Target = EncodeBuffer;

    fn deref(&self) -> &EncodeBuffer {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut EncodeBuffer {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(class) = self.class {
            let buffer = std::mem::take(&mut self.buffer);
            self.pool.give_back(class, buffer.into_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn classes_double_up_to_max() {
        let pool = BufferPool::new(200, 1600);

        assert_eq!(pool.class_sizes(), &[200, 400, 800, 1600]);
    }

    #[test]
    fn dropped_buffer_returns_to_pool() {
        let pool = BufferPool::new(64, 256);

        {
            let mut buffer = pool.checkout(100);
            buffer.write_all(b"hello").unwrap();
            assert_eq!(buffer.limit(), 100);
        }

        assert_eq!(pool.idle(), 1);

        let reused = pool.checkout(128);
        assert!(reused.is_empty());
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn oversized_checkout_is_not_pooled() {
        let pool = BufferPool::new(64, 128);

        drop(pool.checkout(4096));

        assert_eq!(pool.idle(), 0);
    }
}
