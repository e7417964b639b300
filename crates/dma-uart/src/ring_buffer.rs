//! Byte ring buffer between the RX interrupt and the reading task
//!
//! A [`heapless::spsc::Queue`] that a channel splits exactly once: the
//! [`Producer`] half stays with the demultiplexer (interrupt context), the
//! [`Consumer`] half goes to the task that reads the stream. Neither side
//! takes a lock; the queue's head and tail each have a single writer.
//!
//! `N` bytes of storage hold at most `N - 1` queued bytes (size the storage as
//! 2^n + 1 for a 2^n-byte queue). A write never overwrites unread data: the
//! producer stores as much as fits and reports the short count.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use heapless::spsc::{Consumer, Producer, Queue};

/// Fixed-capacity byte queue backed by `N` bytes of storage, split once into
/// its two endpoints.
pub struct RingBuffer<const N: usize> {
    queue: UnsafeCell<Queue<u8, N>>,
    split: AtomicBool,
}

// SAFETY: the only access to `queue` is the single `&mut` taken inside
// `split`, admitted once by the `split` flag. Afterwards the queue is reached
// only through its Producer/Consumer, which heapless makes safe to use from
// two contexts.
unsafe impl<const N: usize> Sync for RingBuffer<N> {}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RingBuffer<N> {
    /// Create an empty, unsplit ring buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            queue: UnsafeCell::new(Queue::new()),
            split: AtomicBool::new(false),
        }
    }

    /// Maximum number of queued bytes.
    pub const fn capacity(&self) -> usize {
        N.saturating_sub(1)
    }

    /// Hand out the producer and consumer endpoints. Only the first call
    /// returns them; every later call returns `None`.
    pub fn split(&self) -> Option<(Producer<'_, u8>, Consumer<'_, u8>)> {
        if self.split.swap(true, Ordering::AcqRel) {
            return None;
        }
        // SAFETY: the swap above lets exactly one caller through, and before
        // it no endpoint (and so no other reference into the queue) exists.
        let queue = unsafe { &mut *self.queue.get() };
        Some(queue.split())
    }
}

/// Pop up to `buffer.len()` bytes; returns the number of bytes copied.
pub fn read(consumer: &mut Consumer<'_, u8>, buffer: &mut [u8]) -> usize {
    buffer
        .iter_mut()
        .map_while(|slot| consumer.dequeue().map(|byte| *slot = byte))
        .count()
}

/// Pop exactly `buffer.len()` bytes, or nothing at all if fewer are queued.
/// Returns `true` when `buffer` was filled.
///
/// The producer only ever adds bytes, so a length check followed by the
/// dequeues cannot come up short.
pub fn read_exact(consumer: &mut Consumer<'_, u8>, buffer: &mut [u8]) -> bool {
    if consumer.len() < buffer.len() {
        return false;
    }
    read(consumer, buffer) == buffer.len()
}

/// Drop every byte queued right now. Returns the number of bytes discarded.
pub fn discard(consumer: &mut Consumer<'_, u8>) -> usize {
    let queued = consumer.len();
    (0..queued).map_while(|_| consumer.dequeue()).count()
}

#[cfg(test)]
#[allow(
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    clippy::cast_possible_truncation,
    clippy::unwrap_used
)]
mod tests {
    use super::*;
    use crate::demux::ByteSink;

    #[test]
    fn capacity_is_one_less_than_storage() {
        let rb = RingBuffer::<9>::new();
        let (mut tx, rx) = rb.split().unwrap();
        assert_eq!(rb.capacity(), 8);
        assert_eq!(tx.append(&[0xAA; 20]), 8);
        assert_eq!(rx.len(), 8);
    }

    #[test]
    fn splits_only_once() {
        let rb = RingBuffer::<5>::new();
        assert!(rb.split().is_some());
        assert!(rb.split().is_none());
    }

    #[test]
    fn read_returns_bytes_in_write_order_across_wrap() {
        let rb = RingBuffer::<9>::new();
        let (mut tx, mut rx) = rb.split().unwrap();
        assert_eq!(tx.append(&[1, 2, 3, 4, 5, 6]), 6);
        let mut out = [0u8; 4];
        assert_eq!(read(&mut rx, &mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);

        // the tail index is at 6; this write wraps past the end of storage
        assert_eq!(tx.append(&[7, 8, 9, 10, 11]), 5);
        let mut rest = [0u8; 16];
        assert_eq!(read(&mut rx, &mut rest), 7);
        assert_eq!(&rest[..7], &[5, 6, 7, 8, 9, 10, 11]);
        assert!(rx.is_empty());
    }

    #[test]
    fn overflowing_write_keeps_queued_bytes_intact() {
        let rb = RingBuffer::<5>::new();
        let (mut tx, mut rx) = rb.split().unwrap();
        assert_eq!(tx.append(&[1, 2, 3]), 3);
        assert_eq!(tx.append(&[4, 5, 6]), 1);
        assert_eq!(tx.append(&[7]), 0);

        let mut out = [0u8; 8];
        assert_eq!(read(&mut rx, &mut out), 4);
        assert_eq!(&out[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn read_into_empty_slice_consumes_nothing() {
        let rb = RingBuffer::<5>::new();
        let (mut tx, mut rx) = rb.split().unwrap();
        tx.append(&[1, 2]);
        assert_eq!(read(&mut rx, &mut []), 0);
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn read_exact_is_all_or_nothing() {
        let rb = RingBuffer::<9>::new();
        let (mut tx, mut rx) = rb.split().unwrap();
        tx.append(&[1, 2, 3]);

        let mut four = [0u8; 4];
        assert!(!read_exact(&mut rx, &mut four));
        assert_eq!(four, [0; 4]);
        assert_eq!(rx.len(), 3);

        let mut three = [0u8; 3];
        assert!(read_exact(&mut rx, &mut three));
        assert_eq!(three, [1, 2, 3]);
        assert!(rx.is_empty());
    }

    #[test]
    fn discard_empties_and_keeps_accepting() {
        let rb = RingBuffer::<9>::new();
        let (mut tx, mut rx) = rb.split().unwrap();
        tx.append(&[1, 2, 3]);
        assert_eq!(discard(&mut rx), 3);
        assert!(rx.is_empty());

        tx.append(&[4, 5]);
        let mut out = [0u8; 4];
        assert_eq!(read(&mut rx, &mut out), 2);
        assert_eq!(&out[..2], &[4, 5]);
    }

    #[test]
    fn concurrent_producer_and_consumer_preserve_order() {
        const TOTAL: usize = 20_000;
        let rb = RingBuffer::<17>::new();
        let (mut tx, mut rx) = rb.split().unwrap();

        std::thread::scope(|s| {
            s.spawn(move || {
                let mut next = 0usize;
                while next < TOTAL {
                    let chunk: [u8; 5] = core::array::from_fn(|i| ((next + i) % 251) as u8);
                    let want = (TOTAL - next).min(chunk.len());
                    next += tx.append(&chunk[..want]);
                }
            });

            let mut seen = 0usize;
            let mut buf = [0u8; 7];
            while seen < TOTAL {
                let n = read(&mut rx, &mut buf);
                for &b in &buf[..n] {
                    assert_eq!(b, (seen % 251) as u8);
                    seen += 1;
                }
            }
        });
        assert!(rx.is_empty());
    }
}
