//! Lock-free single-producer single-consumer byte ring.
//!
//! The transport engine and the host audio process exchange interleaved
//! sample data and timestamped MIDI records through these rings. Both sides
//! run on realtime threads, so every operation is non-blocking: `write` and
//! `read` move as many bytes as currently fit and report the count, and the
//! `*_space` accessors let callers decide whole-transfer policy up front.

use core::cell::UnsafeCell;
use core::ptr;
#[cfg(not(loom))]
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

#[cfg(loom)]
use loom::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// Cache-line padded wrapper to prevent false sharing.
///
/// Head and tail live on separate cache lines so the producer and consumer
/// threads do not invalidate each other's loads.
#[repr(align(64))]
struct CachePadded<T>(T);

impl<T> CachePadded<T> {
    const fn new(value: T) -> Self {
        CachePadded(value)
    }
}

impl<T> core::ops::Deref for CachePadded<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Writer half of a ring, as the engine sees it.
///
/// The engine is the producer of the device-to-host rings; the host adapter
/// implements the same contract on its side of the boundary.
pub trait RingWriter: Send {
    /// Number of bytes that can currently be written without wrapping over
    /// unread data.
    fn write_space(&self) -> usize;

    /// Number of bytes queued for the consumer. The engine samples this
    /// for its latency stats.
    fn read_space(&self) -> usize;

    /// Copy as much of `src` as fits into the ring. Returns the number of
    /// bytes written. Never blocks.
    fn write(&mut self, src: &[u8]) -> usize;
}

/// Reader half of a ring, as the engine sees it.
pub trait RingReader: Send {
    /// Number of bytes available to read.
    fn read_space(&self) -> usize;

    /// Copy up to `dst.len()` bytes out of the ring. Returns the number of
    /// bytes read. Never blocks.
    fn read(&mut self, dst: &mut [u8]) -> usize;

    /// Drop up to `max` bytes without copying them anywhere.
    ///
    /// This is the null-destination read of the ring contract; the engine
    /// uses it to resynchronize on whole-frame boundaries.
    fn discard(&mut self, max: usize) -> usize;
}

/// Internal shared state for the ring.
struct ByteRingInner {
    buffer: Box<[UnsafeCell<u8>]>,
    capacity: usize,
    mask: usize,
    head: CachePadded<AtomicUsize>, // Write position (producer)
    tail: CachePadded<AtomicUsize>, // Read position (consumer)
}

// SAFETY: access to the byte cells is synchronized through the head/tail
// atomics; the producer only writes between head and tail + capacity, the
// consumer only reads between tail and head.
unsafe impl Send for ByteRingInner {}
unsafe impl Sync for ByteRingInner {}

impl ByteRingInner {
    fn with_capacity(capacity: usize) -> Self {
        // Round up to next power of 2
        let capacity = capacity.next_power_of_two().max(1);
        let mask = capacity - 1;

        let buffer: Vec<UnsafeCell<u8>> = (0..capacity).map(|_| UnsafeCell::new(0)).collect();

        Self {
            buffer: buffer.into_boxed_slice(),
            capacity,
            mask,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        // SAFETY: UnsafeCell<u8> has the same layout as u8, so the boxed
        // slice of cells is addressable as a contiguous byte region.
        self.buffer.as_ptr() as *mut u8
    }
}

/// Factory for creating producer/consumer pairs.
pub struct ByteRing;

impl ByteRing {
    /// Creates a new SPSC byte ring with at least the given capacity.
    ///
    /// The actual capacity is rounded up to the next power of 2. Returns a
    /// `(RingProducer, RingConsumer)` pair for inter-thread communication.
    ///
    /// # Examples
    ///
    /// ```
    /// use obx_core::ring::{ByteRing, RingReader, RingWriter};
    ///
    /// let (mut producer, mut consumer) = ByteRing::with_capacity(64);
    ///
    /// assert_eq!(producer.write(&[1, 2, 3]), 3);
    /// let mut out = [0u8; 3];
    /// assert_eq!(consumer.read(&mut out), 3);
    /// assert_eq!(out, [1, 2, 3]);
    /// ```
    pub fn with_capacity(capacity: usize) -> (RingProducer, RingConsumer) {
        let inner = Arc::new(ByteRingInner::with_capacity(capacity));
        (
            RingProducer {
                inner: Arc::clone(&inner),
            },
            RingConsumer { inner },
        )
    }
}

/// Producer handle for writing bytes into the ring.
///
/// This type is `Send` but not `Clone` - only one producer may exist.
pub struct RingProducer {
    inner: Arc<ByteRingInner>,
}

impl RingProducer {
    /// Returns the total capacity of the ring in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl RingWriter for RingProducer {
    #[inline]
    fn write_space(&self) -> usize {
        let head = self.inner.head.load(Ordering::Relaxed);
        let tail = self.inner.tail.load(Ordering::Acquire);
        self.inner.capacity - head.wrapping_sub(tail)
    }

    #[inline]
    fn read_space(&self) -> usize {
        let head = self.inner.head.load(Ordering::Relaxed);
        let tail = self.inner.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    fn write(&mut self, src: &[u8]) -> usize {
        let head = self.inner.head.load(Ordering::Relaxed);
        let tail = self.inner.tail.load(Ordering::Acquire);
        let space = self.inner.capacity - head.wrapping_sub(tail);

        let count = src.len().min(space);
        if count == 0 {
            return 0;
        }

        let index = head & self.inner.mask;
        let first = count.min(self.inner.capacity - index);

        // SAFETY: the region [head, head + count) is unoccupied (checked
        // against tail above) and only the producer writes to it.
        unsafe {
            let base = self.inner.base();
            ptr::copy_nonoverlapping(src.as_ptr(), base.add(index), first);
            ptr::copy_nonoverlapping(src.as_ptr().add(first), base, count - first);
        }

        self.inner.head.store(head.wrapping_add(count), Ordering::Release);
        count
    }
}

/// Consumer handle for reading bytes from the ring.
///
/// This type is `Send` but not `Clone` - only one consumer may exist.
pub struct RingConsumer {
    inner: Arc<ByteRingInner>,
}

impl RingConsumer {
    /// Returns the total capacity of the ring in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    #[inline]
    fn available(&self) -> (usize, usize) {
        let tail = self.inner.tail.load(Ordering::Relaxed);
        let head = self.inner.head.load(Ordering::Acquire);
        (tail, head.wrapping_sub(tail))
    }
}

impl RingReader for RingConsumer {
    #[inline]
    fn read_space(&self) -> usize {
        self.available().1
    }

    fn read(&mut self, dst: &mut [u8]) -> usize {
        let (tail, available) = self.available();

        let count = dst.len().min(available);
        if count == 0 {
            return 0;
        }

        let index = tail & self.inner.mask;
        let first = count.min(self.inner.capacity - index);

        // SAFETY: the region [tail, tail + count) holds bytes the producer
        // published (checked against head above) and only the consumer
        // reads from it.
        unsafe {
            let base = self.inner.base();
            ptr::copy_nonoverlapping(base.add(index), dst.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(base, dst.as_mut_ptr().add(first), count - first);
        }

        self.inner.tail.store(tail.wrapping_add(count), Ordering::Release);
        count
    }

    fn discard(&mut self, max: usize) -> usize {
        let (tail, available) = self.available();
        let count = max.min(available);
        if count > 0 {
            self.inner.tail.store(tail.wrapping_add(count), Ordering::Release);
        }
        count
    }
}


#[cfg(loom)]
mod loom_tests {
    use loom::thread;

    use super::*;

    #[test]
    fn loom_concurrent_write_read() {
        loom::model(|| {
            let (mut producer, mut consumer) = ByteRing::with_capacity(2);

            let producer_thread = thread::spawn(move || {
                let _ = producer.write(&[1]);
                let _ = producer.write(&[2]);
            });

            let consumer_thread = thread::spawn(move || {
                let mut received = Vec::new();
                let mut byte = [0u8; 1];
                for _ in 0..2 {
                    if consumer.read(&mut byte) == 1 {
                        received.push(byte[0]);
                    }
                }
                received
            });

            producer_thread.join().unwrap();
            let received = consumer_thread.join().unwrap();

            // Whatever was observed must be a prefix of what was written
            assert!(received.is_empty() || received == [1] || received == [1, 2]);
        });
    }
}
