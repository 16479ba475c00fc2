use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Padding to keep the producer-owned `head` and consumer-owned `tail`
/// counters off the same cache line, avoiding false sharing between the two
/// threads that drive a `RingBuffer`.
#[repr(align(64))]
#[derive(Default)]
struct CachePadded<T>(T);

/// Single-producer/single-consumer lock-free ring buffer over a power-of-two
/// number of slots. `push` is only sound called from one producer thread,
/// `pop` from one consumer thread; both may run concurrently with each
/// other.
pub struct RingBuffer<T> {
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// `capacity` must be a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "RingBuffer capacity must be a power of two");
        let buffer = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        RingBuffer {
            buffer,
            mask: capacity - 1,
            head: CachePadded(AtomicUsize::new(0)),
            tail: CachePadded(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Number of items currently queued. Only a momentary snapshot under
    /// concurrent producer/consumer activity.
    pub fn len(&self) -> usize {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Pushes `value`; returns it back in `Err` if the ring is full.
    pub fn push(&self, value: T) -> Result<(), T> {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= self.capacity() {
            return Err(value);
        }

        let slot = &self.buffer[head & self.mask];
        unsafe { (*slot.get()).write(value) };
        self.head.0.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Pops the oldest queued item, or `None` if the ring is empty.
    pub fn pop(&self) -> Option<T> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);
        if tail >= head {
            return None;
        }

        let slot = &self.buffer[tail & self.mask];
        let value = unsafe { (*slot.get()).assume_init_read() };
        self.tail.0.store(tail.wrapping_add(1), Ordering::Release);
        Some(value)
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn push_pop_fifo_order() {
        let ring = RingBuffer::<u32>::new(4);
        ring.push(1).unwrap();
        ring.push(2).unwrap();
        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn push_rejects_when_full() {
        let ring = RingBuffer::<u32>::new(2);
        ring.push(1).unwrap();
        ring.push(2).unwrap();
        assert_eq!(ring.push(3), Err(3));
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn construction_rejects_non_power_of_two() {
        let _ = RingBuffer::<u32>::new(3);
    }

    #[test]
    fn spsc_handoff_across_threads() {
        let ring = Arc::new(RingBuffer::<u64>::new(1024));
        let producer = ring.clone();
        let handle = thread::spawn(move || {
            for i in 0..10_000u64 {
                while producer.push(i).is_err() {
                    thread::yield_now();
                }
            }
        });

        let mut received = Vec::with_capacity(10_000);
        while received.len() < 10_000 {
            if let Some(v) = ring.pop() {
                received.push(v);
            } else {
                thread::yield_now();
            }
        }
        handle.join().unwrap();
        assert!(received.windows(2).all(|w| w[0] < w[1]));
    }
}
