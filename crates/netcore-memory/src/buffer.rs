use std::{
    cell::UnsafeCell,
    fmt,
    ptr::NonNull,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::error::BufferError;

pub const CDEFAULT: usize = 8 * 1024;
pub const CMAX: usize = 1024 * 1024;

struct Inner {
    data: UnsafeCell<Vec<u8>>,
    len: AtomicUsize,
    refs: AtomicUsize,
    pool: Option<Pool>,
}

// `data` is only ever written through `&mut Buffer`, which requires the caller
// to hold the sole outstanding reference (refs == 1); once a buffer is shared
// (refs > 1) only read-only access (`bytes`) is reachable, so concurrent
// readers never race a writer.
unsafe impl Sync for Inner {}

/// Ref-counted, pool-backed byte buffer. Capacity grows by doubling up to
/// [`CMAX`]; `add_ref`/`release` are atomic and the buffer returns to its
/// pool when the count reaches zero, unless its capacity has grown past the
/// ceiling, in which case it is freed instead.
pub struct Buffer {
    inner: NonNull<Inner>,
}

unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    fn from_vec(data: Vec<u8>, pool: Option<Pool>) -> Self {
        let inner = Box::new(Inner {
            data: UnsafeCell::new(data),
            len: AtomicUsize::new(0),
            refs: AtomicUsize::new(1),
            pool,
        });
        Buffer { inner: NonNull::from(Box::leak(inner)) }
    }

    /// A standalone buffer with no pool backing; `release` frees it directly.
    pub fn standalone(capacity: usize) -> Self {
        Self::from_vec(vec![0u8; capacity], None)
    }

    fn inner(&self) -> &Inner {
        unsafe { self.inner.as_ref() }
    }

    #[allow(clippy::mut_from_ref)]
    fn data_vec(&self) -> &mut Vec<u8> {
        unsafe { &mut *self.inner().data.get() }
    }

    pub fn capacity(&self) -> usize {
        self.data_vec().capacity()
    }

    pub fn len(&self) -> usize {
        self.inner().len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-only view over `[0, len)`.
    pub fn bytes(&self) -> &[u8] {
        &self.data_vec()[..self.len()]
    }

    /// Mutable view over the full `[0, capacity)` region, for in-place fills.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.data_vec().as_mut_slice()
    }

    /// Grows capacity to at least `len() + n`, doubling each step, capped at
    /// [`CMAX`]. Fails with [`BufferError::InsufficientSize`] when even the
    /// capped capacity cannot hold the request.
    pub fn grow(&mut self, n: usize) -> Result<(), BufferError> {
        let cap = self.capacity();
        let len = self.len();
        if cap - len >= n {
            return Ok(());
        }

        let mut new_cap = cap.max(1);
        while new_cap < len + n {
            new_cap = new_cap.saturating_mul(2);
            if new_cap >= CMAX {
                new_cap = CMAX;
                break;
            }
        }

        if new_cap < len + n {
            return Err(BufferError::InsufficientSize { capacity: cap, requested: n, ceiling: CMAX });
        }

        let data = self.data_vec();
        data.resize(new_cap, 0);
        Ok(())
    }

    /// `grow(n - (capacity - len))` when that is positive, else a no-op.
    pub fn ensure_space(&mut self, n: usize) -> Result<(), BufferError> {
        let avail = self.capacity() - self.len();
        if n > avail { self.grow(n - avail) } else { Ok(()) }
    }

    /// Appends `bytes`, growing as needed. Fails rather than truncating.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.ensure_space(bytes.len())?;
        let len = self.len();
        self.data_vec()[len..len + bytes.len()].copy_from_slice(bytes);
        self.set_length(len + bytes.len());
        Ok(())
    }

    /// Requires `0 <= n <= capacity`.
    pub fn set_length(&mut self, n: usize) {
        debug_assert!(n <= self.capacity(), "set_length({n}) exceeds capacity {}", self.capacity());
        self.inner().len.store(n, Ordering::Release);
    }

    pub fn reset(&mut self) {
        self.set_length(0);
    }

    pub fn add_ref(&self) {
        self.inner().refs.fetch_add(1, Ordering::Relaxed);
    }

    /// Current reference count. A writer that wants to reuse this buffer's
    /// allocation across calls must only do so while this is `1` — any
    /// higher and some other holder (e.g. a transport still draining an
    /// earlier write) may still be reading the old contents.
    pub fn ref_count(&self) -> usize {
        self.inner().refs.load(Ordering::Acquire)
    }

    /// Decrements the reference count; returns the buffer to its pool (or
    /// frees it, if it outgrew the ceiling) once the count reaches zero.
    pub fn release(self) {
        // drop does the work
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        self.add_ref();
        Buffer { inner: self.inner }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.inner().refs.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        // last ref: reclaim the heap allocation
        let boxed = unsafe { Box::from_raw(self.inner.as_ptr()) };
        let Inner { data, pool, .. } = *boxed;
        let data = data.into_inner();
        if let Some(pool) = pool {
            pool.recycle(data);
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[derive(Default)]
struct PoolStats {
    alloc: AtomicUsize,
    free: AtomicUsize,
    hit: AtomicUsize,
    miss: AtomicUsize,
}

struct PoolInner {
    free_list: Mutex<Vec<Vec<u8>>>,
    default_size: usize,
    ceiling: usize,
    stats: PoolStats,
}

/// Thread-safe free list of recycled buffers, keyed by "at most one size
/// class" — anything returned with capacity `<= ceiling` is retained for
/// reuse, larger allocations are dropped on release.
#[derive(Clone)]
pub struct Pool(std::sync::Arc<PoolInner>);

impl Pool {
    pub fn new(default_size: usize, ceiling: usize) -> Self {
        Pool(std::sync::Arc::new(PoolInner {
            free_list: Mutex::new(Vec::new()),
            default_size,
            ceiling,
            stats: PoolStats::default(),
        }))
    }

    /// Returns a buffer with `len() == 0`, a single reference, and capacity
    /// at least `default_size`. Reuses a recycled allocation when the free
    /// list is non-empty.
    pub fn acquire(&self) -> Buffer {
        let mut recycled = self.0.free_list.lock().unwrap().pop();
        if recycled.is_some() {
            self.0.stats.hit.fetch_add(1, Ordering::Relaxed);
        } else {
            self.0.stats.miss.fetch_add(1, Ordering::Relaxed);
            self.0.stats.alloc.fetch_add(1, Ordering::Relaxed);
            recycled = Some(vec![0u8; self.0.default_size]);
        }
        let mut data = recycled.unwrap();
        if data.len() < self.0.default_size {
            data.resize(self.0.default_size, 0);
        }
        Buffer::from_vec(data, Some(self.clone()))
    }

    fn recycle(&self, data: Vec<u8>) {
        if data.capacity() > self.0.ceiling {
            self.0.stats.free.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.0.free_list.lock().unwrap().push(data);
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            alloc: self.0.stats.alloc.load(Ordering::Relaxed),
            free: self.0.stats.free.load(Ordering::Relaxed),
            hit: self.0.stats.hit.load(Ordering::Relaxed),
            miss: self.0.stats.miss.load(Ordering::Relaxed),
        }
    }
}

impl Default for Pool {
    fn default() -> Self {
        Pool::new(CDEFAULT, CMAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    pub alloc: usize,
    pub free: usize,
    pub hit: usize,
    pub miss: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_is_empty_with_default_capacity() {
        let pool = Pool::default();
        let buf = pool.acquire();
        assert_eq!(buf.len(), 0);
        assert!(buf.capacity() >= CDEFAULT);
    }

    #[test]
    fn grow_doubles_and_caps_at_ceiling() {
        let mut buf = Buffer::standalone(16);
        buf.grow(10).unwrap();
        assert!(buf.capacity() >= 10);

        let mut huge = Buffer::standalone(16);
        let err = huge.grow(CMAX + 1).unwrap_err();
        assert!(matches!(err, BufferError::InsufficientSize { .. }));
    }

    #[test]
    fn append_extends_length() {
        let mut buf = Buffer::standalone(4);
        buf.append(b"hello").unwrap();
        assert_eq!(buf.bytes(), b"hello");
    }

    #[test]
    fn release_returns_to_pool() {
        let pool = Pool::default();
        let buf = pool.acquire();
        let before = pool.stats().hit;
        drop(buf);
        let buf2 = pool.acquire();
        assert_eq!(pool.stats().hit, before + 1);
        drop(buf2);
    }

    #[test]
    fn clone_keeps_shared_buffer_alive() {
        let pool = Pool::default();
        let mut buf = pool.acquire();
        buf.append(b"zero-copy").unwrap();
        let shared = buf.clone();
        drop(buf);
        assert_eq!(shared.bytes(), b"zero-copy");
    }

    #[test]
    fn oversized_release_is_not_recycled() {
        let pool = Pool::new(CDEFAULT, 32);
        let mut buf = pool.acquire();
        buf.grow(CDEFAULT).unwrap();
        assert!(buf.capacity() > 32);
        drop(buf);
        // the oversized allocation was freed, not recycled; a fresh acquire
        // should come back as a pool miss
        let stats_before = pool.stats();
        let _fresh = pool.acquire();
        let stats_after = pool.stats();
        assert_eq!(stats_after.miss, stats_before.miss + 1);
    }
}
