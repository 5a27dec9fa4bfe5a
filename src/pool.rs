//! Process-wide buffer pool, avoiding a fresh allocation per
//! connection: an explicit, thread-safe pool so that the byte pipe,
//! the response serializer's header batching, and the pooled header
//! map can all share leased buffers instead of allocating.
//!
//! Buffers are grouped into power-of-two size classes. A lease is
//! returned to its class's free list on `Drop`, so every call site gets
//! "rent it, use it, it goes back" for free and release happens on
//! every exit path, including panics unwinding through the guard.

use std::sync::{Arc, Mutex};

/// A process-wide pool of reusable byte buffers, grouped into
/// power-of-two size classes starting at 4 KiB.
#[derive(Clone)]
pub struct BufPool {
    inner: Arc<Mutex<Vec<Vec<u8>>>>,
}

const MIN_CLASS: usize = 4 * 1024;

impl BufPool {
    pub fn new() -> BufPool {
        BufPool {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn class_size(requested: usize) -> usize {
        let mut size = MIN_CLASS;
        while size < requested {
            size *= 2;
        }
        size
    }

    /// Lease a buffer with at least `requested` bytes of capacity.
    /// Reuses a returned buffer of the right class if one is free,
    /// otherwise allocates a new one.
    pub fn lease(&self, requested: usize) -> PooledBuf {
        let class = Self::class_size(requested);
        let mut free = self.inner.lock().expect("buffer pool mutex poisoned");
        let buf = match free.iter().position(|b| b.capacity() == class) {
            Some(idx) => {
                let mut buf = free.swap_remove(idx);
                buf.clear();
                buf
            }
            None => Vec::with_capacity(class),
        };
        PooledBuf {
            buf: Some(buf),
            pool: self.inner.clone(),
        }
    }
}

impl Default for BufPool {
    fn default() -> Self {
        BufPool::new()
    }
}

/// A leased buffer. Returned to its pool automatically when dropped;
/// every caller-visible exit path (including unwinding) releases it
/// exactly once.
pub struct PooledBuf {
    buf: Option<Vec<u8>>,
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl PooledBuf {
    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("pooled buffer used after release")
    }
}

impl std::ops::Deref for PooledBuf {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.buf.as_deref().expect("pooled buffer used after release")
    }
}

impl std::ops::DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().expect("pooled buffer used after release")
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            if let Ok(mut free) = self.pool.lock() {
                // Keep the free list from growing without bound under a
                // connection storm; a handful of spare buffers per class
                // is enough to avoid reallocating on the common path.
                if free.len() < 256 {
                    free.push(buf);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::BufPool;

    #[test]
    fn lease_rounds_up_to_class() {
        let pool = BufPool::new();
        let buf = pool.lease(100);
        assert_eq!(buf.buf.as_ref().unwrap().capacity(), 4096);
    }

    #[test]
    fn returned_buffer_is_reused() {
        let pool = BufPool::new();
        {
            let mut buf = pool.lease(4096);
            buf.as_mut_vec().extend_from_slice(b"hello");
        }
        let buf = pool.lease(4096);
        // the pool cleared it on the way back in
        assert_eq!(buf.buf.as_ref().unwrap().len(), 0);
        assert_eq!(pool.inner.lock().unwrap().len(), 0);
    }
}
