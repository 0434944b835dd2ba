//! Lock-free ring buffer for passing samples between threads
//!
//! This module provides a fixed-capacity single-producer/single-consumer
//! (SPSC) queue of `f32` samples. The real-time audio callback sits on one
//! side and the worker thread on the other.
//!
//! ## Design Notes
//!
//! - Storage is a boxed slice allocated once in [`RingBuffer::new`] and never
//!   resized.
//! - `head` (read position) is advanced only by the [`RingConsumer`], `tail`
//!   (write position) only by the [`RingProducer`]. Each index is published
//!   with a release store and observed with an acquire load.
//! - Indices run over `[0, 2 * capacity)`. The slot is `index % capacity` and
//!   the extra lap bit tells a full buffer from an empty one, so every slot is
//!   usable and `available_for_read() + available_for_write() == capacity`.
//! - Blocking transfers poll with a short sleep. There is no condition
//!   variable, so the real-time side never waits on anything the worker holds.

use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::error::{BridgeError, BridgeResult};

/// Default poll interval used while a blocking transfer waits
pub const DEFAULT_BLOCKING_NAP: Duration = Duration::from_micros(500);

/// Cache-line aligned wrapper so the two indices never share a line
#[repr(align(64))]
struct CacheAligned<T>(T);

/// State shared by both halves of a ring buffer
struct Shared {
    storage: Box<[UnsafeCell<f32>]>,
    capacity: usize,
    /// Next read position, owned by the consumer
    head: CacheAligned<AtomicUsize>,
    /// Next write position, owned by the producer
    tail: CacheAligned<AtomicUsize>,
    closed: AtomicBool,
    label: String,
}

// Slots are only written between `tail` and `head + capacity` by the single
// producer and only read between `head` and `tail` by the single consumer.
unsafe impl Sync for Shared {}

impl Shared {
    fn occupied(&self, head: usize, tail: usize) -> usize {
        if tail >= head {
            tail - head
        } else {
            tail + 2 * self.capacity - head
        }
    }

    fn advance(&self, index: usize, count: usize) -> usize {
        let next = index + count;
        if next >= 2 * self.capacity {
            next - 2 * self.capacity
        } else {
            next
        }
    }

    fn slot(&self, index: usize) -> usize {
        if index >= self.capacity {
            index - self.capacity
        } else {
            index
        }
    }

    fn base(&self) -> *mut f32 {
        UnsafeCell::raw_get(self.storage.as_ptr())
    }

    fn available_for_read(&self) -> usize {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        self.occupied(head, tail)
    }

    fn available_for_write(&self) -> usize {
        self.capacity - self.available_for_read()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Poll until `available` reports at least `wanted` items.
    ///
    /// Returns the amount observed, or 0 if the request can never be
    /// satisfied or the ring was closed while waiting.
    fn wait_for(&self, wanted: usize, nap: Duration, available: fn(&Shared) -> usize) -> usize {
        if wanted > self.capacity {
            log::warn!(
                "Ring buffer '{}': blocking transfer of {} exceeds capacity {}",
                self.label,
                wanted,
                self.capacity
            );
            return 0;
        }
        loop {
            let space = available(self);
            if space >= wanted {
                return space;
            }
            if self.is_closed() {
                return 0;
            }
            thread::sleep(nap);
        }
    }
}

/// A fixed-capacity sample queue, not yet split into its two halves
///
/// ## Example
///
/// ```
/// use audio_bridge::audio::RingBuffer;
///
/// let (mut tx, mut rx) = RingBuffer::new(8, "example").unwrap().split();
/// assert_eq!(tx.push(&[1.0, 2.0, 3.0]), 3);
///
/// let mut out = [0.0; 3];
/// assert_eq!(rx.pop(&mut out), 3);
/// assert_eq!(out, [1.0, 2.0, 3.0]);
/// ```
pub struct RingBuffer {
    shared: Arc<Shared>,
}

impl RingBuffer {
    /// Allocate a ring buffer holding `capacity` samples
    ///
    /// # Arguments
    /// * `capacity` - Number of samples, must be at least 1
    /// * `label` - Name used in log messages
    pub fn new(capacity: usize, label: impl Into<String>) -> BridgeResult<Self> {
        let label = label.into();
        if capacity == 0 || capacity > usize::MAX / 4 {
            return Err(BridgeError::InvalidCapacity { label, capacity });
        }

        let storage: Box<[UnsafeCell<f32>]> = (0..capacity).map(|_| UnsafeCell::new(0.0)).collect();

        log::debug!("Ring buffer '{}' allocated ({} samples)", label, capacity);

        Ok(Self {
            shared: Arc::new(Shared {
                storage,
                capacity,
                head: CacheAligned(AtomicUsize::new(0)),
                tail: CacheAligned(AtomicUsize::new(0)),
                closed: AtomicBool::new(false),
                label,
            }),
        })
    }

    /// Whether the index atomics use native hardware instructions here
    ///
    /// `AtomicUsize` only exists on targets with pointer-sized atomics, so on
    /// every target this crate builds for the answer is `true`. Kept as a
    /// query so callers need not know that.
    pub fn is_lock_free() -> bool {
        cfg!(target_has_atomic = "ptr")
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Split into the producer and consumer halves
    ///
    /// Both halves start in non-blocking mode with [`DEFAULT_BLOCKING_NAP`].
    pub fn split(self) -> (RingProducer, RingConsumer) {
        (
            RingProducer {
                shared: Arc::clone(&self.shared),
                blocking: false,
                nap: DEFAULT_BLOCKING_NAP,
                _not_sync: PhantomData,
            },
            RingConsumer {
                shared: self.shared,
                blocking: false,
                nap: DEFAULT_BLOCKING_NAP,
                _not_sync: PhantomData,
            },
        )
    }
}

/// Write half of a [`RingBuffer`]
///
/// `Send` but not `Sync`: exactly one thread can push at a time.
pub struct RingProducer {
    shared: Arc<Shared>,
    blocking: bool,
    nap: Duration,
    _not_sync: PhantomData<Cell<()>>,
}

impl RingProducer {
    /// Choose between best-effort and wait-for-space pushes
    pub fn set_blocking(&mut self, block: bool) {
        self.blocking = block;
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Poll interval used by blocking pushes
    pub fn set_blocking_nap(&mut self, nap: Duration) {
        self.nap = nap;
    }

    /// Copy samples from `data` into the buffer
    ///
    /// In non-blocking mode this writes as many samples as fit and returns
    /// the count; a short count means the buffer is full. In blocking mode
    /// it waits until all of `data` fits and writes it in one go, returning
    /// `data.len()`, or returns 0 without writing if `data` is larger than
    /// the capacity or the buffer is closed while waiting.
    pub fn push(&mut self, data: &[f32]) -> usize {
        let n = data.len();
        if n == 0 {
            return 0;
        }

        let space = if self.blocking {
            self.shared.wait_for(n, self.nap, Shared::available_for_write)
        } else {
            self.shared.available_for_write()
        };
        let count = n.min(space);
        if count == 0 {
            return 0;
        }

        let capacity = self.shared.capacity;
        let tail = self.shared.tail.0.load(Ordering::Relaxed);
        let start = self.shared.slot(tail);
        let first = count.min(capacity - start);
        let base = self.shared.base();

        // SAFETY: the `count` slots starting at `tail` are free. The consumer
        // never reads at or past `tail`, and only this half advances it.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), base.add(start), first);
            ptr::copy_nonoverlapping(data.as_ptr().add(first), base, count - first);
        }

        self.shared
            .tail
            .0
            .store(self.shared.advance(tail, count), Ordering::Release);
        count
    }

    pub fn available_for_write(&self) -> usize {
        self.shared.available_for_write()
    }

    pub fn available_for_read(&self) -> usize {
        self.shared.available_for_read()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// A handle that can close this buffer from any thread
    pub fn closer(&self) -> RingCloser {
        RingCloser {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Read half of a [`RingBuffer`]
///
/// `Send` but not `Sync`: exactly one thread can pop at a time.
pub struct RingConsumer {
    shared: Arc<Shared>,
    blocking: bool,
    nap: Duration,
    _not_sync: PhantomData<Cell<()>>,
}

impl RingConsumer {
    /// Choose between best-effort and wait-for-data pops
    pub fn set_blocking(&mut self, block: bool) {
        self.blocking = block;
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Poll interval used by blocking pops
    pub fn set_blocking_nap(&mut self, nap: Duration) {
        self.nap = nap;
    }

    /// Copy samples out of the buffer into `data`
    ///
    /// Mirrors [`RingProducer::push`]: best effort in non-blocking mode,
    /// all-or-nothing in blocking mode.
    pub fn pop(&mut self, data: &mut [f32]) -> usize {
        let n = data.len();
        if n == 0 {
            return 0;
        }

        let available = if self.blocking {
            self.shared.wait_for(n, self.nap, Shared::available_for_read)
        } else {
            self.shared.available_for_read()
        };
        let count = n.min(available);
        if count == 0 {
            return 0;
        }

        let capacity = self.shared.capacity;
        let head = self.shared.head.0.load(Ordering::Relaxed);
        let start = self.shared.slot(head);
        let first = count.min(capacity - start);
        let base = self.shared.base();

        // SAFETY: the `count` slots starting at `head` were published by the
        // producer's release store of `tail`, observed above with acquire.
        unsafe {
            ptr::copy_nonoverlapping(base.add(start), data.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(base, data.as_mut_ptr().add(first), count - first);
        }

        self.shared
            .head
            .0
            .store(self.shared.advance(head, count), Ordering::Release);
        count
    }

    pub fn available_for_read(&self) -> usize {
        self.shared.available_for_read()
    }

    pub fn available_for_write(&self) -> usize {
        self.shared.available_for_write()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// A handle that can close this buffer from any thread
    pub fn closer(&self) -> RingCloser {
        RingCloser {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Closes a ring buffer without owning either half
///
/// Closing wakes blocking transfers, which then return 0. Samples already
/// in the buffer can still be popped.
#[derive(Clone)]
pub struct RingCloser {
    shared: Arc<Shared>,
}

impl RingCloser {
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::{Consumer as _, Observer as _, Producer as _, Split as _};
    use ringbuf::HeapRb;
    use std::time::Instant;

    fn ring(capacity: usize) -> (RingProducer, RingConsumer) {
        RingBuffer::new(capacity, "test").unwrap().split()
    }

    /// Small deterministic generator so the tests need no extra crates
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: usize) -> usize {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((self.0 >> 33) as usize) % bound
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = RingBuffer::new(0, "empty").err().unwrap();
        assert!(matches!(err, BridgeError::InvalidCapacity { capacity: 0, .. }));
    }

    #[test]
    fn test_starts_empty() {
        let (tx, rx) = ring(10);
        assert_eq!(tx.available_for_write(), 10);
        assert_eq!(rx.available_for_read(), 0);
        assert_eq!(tx.capacity(), 10);
        assert_eq!(rx.label(), "test");
    }

    #[test]
    fn test_push_pop_occupancy_sequence() {
        let (mut tx, mut rx) = ring(10);
        let input = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let mut out = [0.0; 8];

        assert_eq!(tx.push(&input[..1]), 1);
        assert_eq!(tx.push(&input[..5]), 5);
        assert_eq!(rx.pop(&mut out[..5]), 5);

        assert_eq!(tx.available_for_write(), 9);
        assert_eq!(rx.available_for_read(), 1);
        assert_eq!(&out[..5], &[1.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_occupancy_always_sums_to_capacity() {
        let capacity = 13;
        let (mut tx, mut rx) = ring(capacity);
        let mut rng = Lcg(7);
        let data: Vec<f32> = (0..capacity).map(|i| i as f32).collect();
        let mut out = vec![0.0; capacity];

        for _ in 0..500 {
            if rng.next(2) == 0 {
                let n = rng.next(tx.available_for_write() + 1);
                assert_eq!(tx.push(&data[..n]), n);
            } else {
                let n = rng.next(rx.available_for_read() + 1);
                assert_eq!(rx.pop(&mut out[..n]), n);
            }
            assert_eq!(rx.available_for_read() + tx.available_for_write(), capacity);
        }
    }

    #[test]
    fn test_full_buffer_is_not_empty() {
        let (mut tx, mut rx) = ring(4);
        assert_eq!(tx.push(&[1.0, 2.0, 3.0, 4.0]), 4);
        assert_eq!(tx.available_for_write(), 0);
        assert_eq!(rx.available_for_read(), 4);

        // A full lap later the indices coincide again.
        let mut out = [0.0; 4];
        assert_eq!(rx.pop(&mut out), 4);
        assert_eq!(tx.push(&[5.0, 6.0, 7.0, 8.0]), 4);
        assert_eq!(rx.available_for_read(), 4);
        assert_eq!(rx.pop(&mut out), 4);
        assert_eq!(out, [5.0, 6.0, 7.0, 8.0]);
        assert_eq!(rx.available_for_read(), 0);
    }

    #[test]
    fn test_wrapped_round_trip() {
        let (mut tx, mut rx) = ring(8);
        let mut scratch = [0.0; 8];

        // Move the indices close to the end of storage.
        assert_eq!(tx.push(&[0.0; 6]), 6);
        assert_eq!(rx.pop(&mut scratch[..6]), 6);

        let sequence = [10.0, 11.0, 12.0, 13.0, 14.0];
        assert_eq!(tx.push(&sequence), 5);
        let mut out = [0.0; 5];
        assert_eq!(rx.pop(&mut out), 5);
        assert_eq!(out, sequence);
    }

    #[test]
    fn test_matches_reference_ring_buffer() {
        let capacity = 11;
        let (mut tx, mut rx) = ring(capacity);
        let (mut ref_tx, mut ref_rx) = HeapRb::<f32>::new(capacity).split();
        let mut rng = Lcg(42);
        let mut next_value = 0.0f32;

        for _ in 0..2000 {
            let n = rng.next(capacity + 4);
            if rng.next(2) == 0 {
                let data: Vec<f32> = (0..n)
                    .map(|_| {
                        next_value += 1.0;
                        next_value
                    })
                    .collect();
                let written = tx.push(&data);
                assert_eq!(written, ref_tx.push_slice(&data));
                // Keep the generated values contiguous across short writes.
                next_value -= (n - written) as f32;
            } else {
                let mut out = vec![0.0; n];
                let mut expected = vec![0.0; n];
                let read = rx.pop(&mut out);
                assert_eq!(read, ref_rx.pop_slice(&mut expected));
                assert_eq!(&out[..read], &expected[..read]);
            }
            assert_eq!(rx.available_for_read(), ref_rx.occupied_len());
        }
    }

    #[test]
    fn test_backpressure_short_write_keeps_data() {
        let (mut tx, mut rx) = ring(6);
        assert_eq!(tx.push(&[1.0, 2.0, 3.0, 4.0]), 4);

        let written = tx.push(&[5.0, 6.0, 7.0, 8.0]);
        assert_eq!(written, 2);
        assert_eq!(tx.available_for_write(), 0);
        assert_eq!(tx.push(&[9.0]), 0);

        let mut out = [0.0; 6];
        assert_eq!(rx.pop(&mut out), 6);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_short_read_when_empty() {
        let (mut tx, mut rx) = ring(6);
        let mut out = [0.0; 4];
        assert_eq!(rx.pop(&mut out), 0);
        tx.push(&[1.0, 2.0]);
        assert_eq!(rx.pop(&mut out), 2);
        assert_eq!(&out[..2], &[1.0, 2.0]);
    }

    #[test]
    fn test_blocking_pop_waits_for_data() {
        let (mut tx, mut rx) = ring(16);
        rx.set_blocking(true);
        rx.set_blocking_nap(Duration::from_micros(100));

        let producer = thread::spawn(move || {
            for chunk in [[1.0, 2.0], [3.0, 4.0]] {
                thread::sleep(Duration::from_millis(10));
                tx.push(&chunk);
            }
        });

        let mut out = [0.0; 4];
        assert_eq!(rx.pop(&mut out), 4);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
        producer.join().unwrap();
    }

    #[test]
    fn test_blocking_push_waits_for_space() {
        let (mut tx, mut rx) = ring(4);
        tx.set_blocking(true);
        tx.set_blocking_nap(Duration::from_micros(100));
        assert_eq!(tx.push(&[1.0, 2.0, 3.0]), 3);

        let consumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            let mut out = [0.0; 3];
            rx.pop(&mut out);
            (rx, out)
        });

        let started = Instant::now();
        assert_eq!(tx.push(&[4.0, 5.0, 6.0]), 3);
        assert!(started.elapsed() >= Duration::from_millis(5));

        let (mut rx, first) = consumer.join().unwrap();
        assert_eq!(first, [1.0, 2.0, 3.0]);
        let mut rest = [0.0; 3];
        assert_eq!(rx.pop(&mut rest), 3);
        assert_eq!(rest, [4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_blocking_rejects_oversized_request() {
        let (mut tx, mut rx) = ring(4);
        tx.set_blocking(true);
        rx.set_blocking(true);

        assert_eq!(tx.push(&[0.0; 5]), 0);
        assert_eq!(tx.available_for_write(), 4);
        let mut out = [0.0; 5];
        assert_eq!(rx.pop(&mut out), 0);
    }

    #[test]
    fn test_close_wakes_blocked_pop() {
        let (tx, mut rx) = ring(8);
        rx.set_blocking(true);
        let closer = tx.closer();

        let waiter = thread::spawn(move || {
            let mut out = [0.0; 4];
            rx.pop(&mut out)
        });

        thread::sleep(Duration::from_millis(10));
        closer.close();
        assert_eq!(waiter.join().unwrap(), 0);
        assert!(tx.is_closed());
    }

    #[test]
    fn test_closed_buffer_still_drains() {
        let (mut tx, mut rx) = ring(8);
        rx.set_blocking(true);
        tx.push(&[1.0, 2.0]);
        tx.close();

        let mut out = [0.0; 2];
        assert_eq!(rx.pop(&mut out), 2);
        assert_eq!(out, [1.0, 2.0]);
    }

    #[test]
    fn test_spsc_threads_preserve_order() {
        const TOTAL: usize = 50_000;
        let (mut tx, mut rx) = ring(37);
        tx.set_blocking(true);
        tx.set_blocking_nap(Duration::from_micros(50));

        let producer = thread::spawn(move || {
            let mut rng = Lcg(3);
            let mut sent = 0;
            while sent < TOTAL {
                let n = (rng.next(20) + 1).min(TOTAL - sent);
                let chunk: Vec<f32> = (sent..sent + n).map(|v| v as f32).collect();
                assert_eq!(tx.push(&chunk), n);
                sent += n;
            }
        });

        let mut rng = Lcg(9);
        let mut expected = 0usize;
        let mut out = [0.0; 32];
        while expected < TOTAL {
            let n = rng.next(32) + 1;
            let read = rx.pop(&mut out[..n]);
            for &sample in &out[..read] {
                assert_eq!(sample, expected as f32);
                expected += 1;
            }
            if read == 0 {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_lock_free_capability() {
        assert!(RingBuffer::is_lock_free());
    }
}
