//! A bounded cache of reusable byte buffers for inbound frame bodies.

use bytes::BytesMut;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Fixed-capacity reservoir of byte buffers.
///
/// The read loop acquires a buffer per inbound frame body; the virtual
/// stream that drains the body releases it. Pooled buffers keep the
/// capacity of their previous use, so steady-state traffic stops
/// allocating. The pool never holds more than its configured capacity.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<VecDeque<BytesMut>>,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> BufferPool {
        BufferPool {
            buffers: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Take a buffer without blocking: a pooled one if available, a fresh
    /// empty buffer otherwise.
    pub fn acquire(&self) -> BytesMut {
        self.buffers.lock().unwrap().pop_front().unwrap_or_default()
    }

    /// Return a buffer. It is cleared and deposited if there is room,
    /// dropped otherwise.
    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();
        let mut buffers = self.buffers.lock().unwrap();
        if buffers.len() < self.capacity {
            buffers.push_back(buf);
        }
    }

    #[cfg(test)]
    fn held(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn first_released_is_next_acquired() {
        let pool = BufferPool::new(1);

        let mut buf0 = pool.acquire();
        buf0.extend_from_slice(b"warm this buffer up");
        let ptr = buf0.as_ptr();
        let buf1 = pool.acquire();

        pool.release(buf0);
        pool.release(buf1); // pool is full, dropped

        let buf2 = pool.acquire();
        assert_eq!(buf2.as_ptr(), ptr);
        assert!(buf2.is_empty());
    }

    #[test]
    fn never_grows_past_capacity() {
        let pool = BufferPool::new(4);
        for _ in 0..32 {
            pool.release(BytesMut::with_capacity(16));
        }
        assert_eq!(pool.held(), 4);
    }

    #[test]
    fn acquire_on_empty_pool_allocates() {
        let pool = BufferPool::new(2);
        assert_eq!(pool.held(), 0);
        let buf = pool.acquire();
        assert!(buf.is_empty());
    }

    #[test]
    fn concurrent_use_stays_bounded() {
        let pool = Arc::new(BufferPool::new(8));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    let mut buf = pool.acquire();
                    buf.extend_from_slice(&[0u8; 64]);
                    pool.release(buf);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.held() <= 8);
    }
}
