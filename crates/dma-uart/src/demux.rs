//! Circular-DMA demultiplexer
//!
//! Converts the free-running write position of a circular DMA buffer into an
//! append-only byte stream: every byte the engine writes is appended to the
//! sink exactly once, however often the hardware notifies.
//!
//! The engine reports how many bytes are *left* before it wraps; the write
//! offset is `len - remaining`. Against the cursor saved by the previous pass
//! there are three cases:
//!
//! ```text
//!  offset == cursor       offset > cursor          offset < cursor (wrapped)
//!
//!  [ 0 ]                  [ 0 ]                    [ 0 ]          | run b
//!  [ 1 ]                  [ 1 ] <- cursor |        [ 1 ]          | (len = offset)
//!  [ 2 ] <- both          [ 2 ]           | run    [ 2 ] <- offset
//!  [ 3 ]   nothing new    [ 3 ]           |        [ 3 ]
//!  [ 4 ]                  [ 4 ] <- offset          [ 4 ] <- cursor | run a
//!  [N-1]                  [N-1]                    [N-1]           | (len = N - cursor)
//! ```
//!
//! In the wrapped case run a (tail) is appended before run b (head).
//! The cursor always moves to `offset`, even when the sink was full: bytes the
//! sink refused are gone, never replayed.

use heapless::spsc::Producer;

use crate::dma_buffer::DmaRxBuffer;
use crate::port::CacheMaintenance;

/// Destination of demultiplexed bytes.
pub trait ByteSink {
    /// Store as much of `bytes` as fits; return how many were stored.
    fn append(&mut self, bytes: &[u8]) -> usize;
}

/// Partial append: enqueue until the queue is full, drop the rest.
impl ByteSink for Producer<'_, u8> {
    fn append(&mut self, bytes: &[u8]) -> usize {
        bytes.iter().take_while(|&&byte| self.enqueue(byte).is_ok()).count()
    }
}

/// Outcome of one demultiplex pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DemuxReport {
    /// DMA write offset observed by this pass
    pub offset: usize,
    /// Contiguous runs handed to the sink (0, 1 or 2)
    pub runs: u8,
    /// Bytes the sink accepted
    pub appended: usize,
    /// Bytes the sink refused (ring full); permanently lost
    pub dropped: usize,
    /// The remaining count was larger than the buffer and was clamped
    pub clamped: bool,
}

impl DemuxReport {
    /// `true` when the pass found nothing new.
    pub const fn is_noop(&self) -> bool {
        self.runs == 0
    }

    /// `true` when some bytes could not be stored.
    pub const fn overflowed(&self) -> bool {
        self.dropped != 0
    }

    #[allow(clippy::arithmetic_side_effects)] // Safety: stored <= run.len(); totals bounded by 2 * DMA length
    fn append_run<S: ByteSink + ?Sized>(&mut self, sink: &mut S, run: &[u8]) {
        let stored = sink.append(run).min(run.len());
        let lost = run.len() - stored;
        self.runs += 1;
        self.appended += stored;
        self.dropped += lost;
        if lost != 0 {
            #[cfg(feature = "defmt")]
            defmt::warn!("rx ring full: dropped {=usize} of {=usize} bytes", lost, run.len());
        }
    }
}

/// Demultiplexer state: the DMA write offset seen by the previous pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Demultiplexer {
    pos_last: usize,
}

impl Demultiplexer {
    /// Cursor at offset 0, matching a freshly armed DMA stream.
    pub const fn new() -> Self {
        Self { pos_last: 0 }
    }

    /// Offset up to which bytes have been handed to the sink.
    pub const fn cursor(&self) -> usize {
        self.pos_last
    }

    /// Realign with a DMA stream that was re-armed at offset 0.
    pub fn rewind(&mut self) {
        self.pos_last = 0;
    }

    /// Write offset for a buffer of `len` bytes with `remaining` left before
    /// the engine wraps. The reload point (`remaining == 0`) maps to 0; a count
    /// larger than the buffer is clamped and flagged.
    pub const fn write_offset(len: usize, remaining: usize) -> (usize, bool) {
        let clamped = remaining > len;
        let remaining = if clamped { len } else { remaining };
        #[allow(clippy::arithmetic_side_effects)] // remaining <= len after clamping
        let offset = len - remaining;
        if offset == len {
            (0, clamped)
        } else {
            (offset, clamped)
        }
    }

    /// Run one pass over a DMA-written buffer.
    ///
    /// The buffer's cache lines are invalidated first, unconditionally: the
    /// engine may have written anywhere since the previous pass. Only then is
    /// the remaining count sampled through `remaining`.
    pub fn process_dma<C, S, const N: usize>(
        &mut self,
        buffer: &DmaRxBuffer<N>,
        cache: &C,
        remaining: impl FnOnce() -> usize,
        sink: &mut S,
    ) -> DemuxReport
    where
        C: CacheMaintenance + ?Sized,
        S: ByteSink + ?Sized,
    {
        cache.invalidate(buffer.as_ptr(), buffer.len());
        self.process(buffer.snapshot(), remaining(), sink)
    }

    /// Run one pass over `dma`, whose engine reports `remaining` bytes left.
    pub fn process<S: ByteSink + ?Sized>(
        &mut self,
        dma: &[u8],
        remaining: usize,
        sink: &mut S,
    ) -> DemuxReport {
        if dma.is_empty() {
            return DemuxReport::default();
        }

        let (offset, clamped) = Self::write_offset(dma.len(), remaining);
        let mut report = DemuxReport {
            offset,
            clamped,
            ..DemuxReport::default()
        };
        if clamped {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "dma remaining {=usize} exceeds buffer length {=usize}",
                remaining,
                dma.len()
            );
        }

        let last = self.pos_last;
        if offset == last {
            return report;
        }

        if offset > last {
            // Linear: one run, cursor .. offset
            report.append_run(sink, dma.get(last..offset).unwrap_or_default());
        } else {
            // Wrapped: tail run first, then head run
            report.append_run(sink, dma.get(last..).unwrap_or_default());
            if offset > 0 {
                report.append_run(sink, dma.get(..offset).unwrap_or_default());
            }
        }

        self.pos_last = offset;
        report
    }
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
    use crate::ring_buffer::RingBuffer;
    use std::vec::Vec;

    /// Sink that records every append call and accepts up to `room` bytes.
    struct Recorder {
        calls: Vec<Vec<u8>>,
        room: usize,
    }

    impl Recorder {
        fn with_room(room: usize) -> Self {
            Self {
                calls: Vec::new(),
                room,
            }
        }

        fn stored(&self) -> Vec<u8> {
            self.calls.concat()
        }
    }

    impl ByteSink for Recorder {
        fn append(&mut self, bytes: &[u8]) -> usize {
            let n = bytes.len().min(self.room);
            self.room -= n;
            self.calls.push(bytes[..n].to_vec());
            n
        }
    }

    const DMA: [u8; 8] = [10, 11, 12, 13, 14, 15, 16, 17];

    #[test]
    fn linear_pass_appends_one_run() {
        let mut demux = Demultiplexer::new();
        let mut sink = Recorder::with_room(64);

        let report = demux.process(&DMA, 8 - 5, &mut sink);

        assert_eq!(sink.calls, vec![vec![10, 11, 12, 13, 14]]);
        assert_eq!(report.runs, 1);
        assert_eq!(report.appended, 5);
        assert_eq!(demux.cursor(), 5);
    }

    #[test]
    fn wrapped_pass_appends_tail_then_head() {
        let mut demux = Demultiplexer::new();
        demux.process(&DMA, 8 - 6, &mut Recorder::with_room(64));
        assert_eq!(demux.cursor(), 6);

        let mut sink = Recorder::with_room(64);
        let report = demux.process(&DMA, 8 - 2, &mut sink);

        assert_eq!(sink.calls, vec![vec![16, 17], vec![10, 11]]);
        assert_eq!(report.runs, 2);
        assert_eq!(report.appended, 4);
        assert_eq!(demux.cursor(), 2);
    }

    #[test]
    fn wrap_to_exact_start_appends_only_the_tail() {
        let mut demux = Demultiplexer::new();
        demux.process(&DMA, 8 - 6, &mut Recorder::with_room(64));

        let mut sink = Recorder::with_room(64);
        // remaining == len: the engine sits at offset 0 after a full lap
        let report = demux.process(&DMA, 8, &mut sink);

        assert_eq!(sink.calls, vec![vec![16, 17]]);
        assert_eq!(report.runs, 1);
        assert_eq!(demux.cursor(), 0);
    }

    #[test]
    fn reload_point_is_offset_zero() {
        assert_eq!(Demultiplexer::write_offset(32, 0), (0, false));
        assert_eq!(Demultiplexer::write_offset(32, 32), (0, false));
        assert_eq!(Demultiplexer::write_offset(32, 1), (31, false));
        assert_eq!(Demultiplexer::write_offset(32, 40), (0, true));
    }

    #[test]
    fn second_pass_without_new_data_is_a_noop() {
        let mut demux = Demultiplexer::new();
        let mut sink = Recorder::with_room(64);

        demux.process(&DMA, 8 - 3, &mut sink);
        let report = demux.process(&DMA, 8 - 3, &mut sink);

        assert!(report.is_noop());
        assert_eq!(sink.calls.len(), 1);
        assert_eq!(demux.cursor(), 3);
    }

    #[test]
    fn full_sink_drops_bytes_but_cursor_still_advances() {
        let mut demux = Demultiplexer::new();
        let mut sink = Recorder::with_room(2);

        let report = demux.process(&DMA, 8 - 5, &mut sink);

        assert_eq!(report.appended, 2);
        assert_eq!(report.dropped, 3);
        assert!(report.overflowed());
        assert_eq!(demux.cursor(), 5);

        // The dropped bytes are not replayed once room appears.
        sink.room = 64;
        let report = demux.process(&DMA, 8 - 7, &mut sink);
        assert_eq!(report.appended, 2);
        assert_eq!(sink.stored(), vec![10, 11, 15, 16]);
    }

    #[test]
    fn failed_tail_append_still_attempts_head() {
        let mut demux = Demultiplexer::new();
        demux.process(&DMA, 8 - 6, &mut Recorder::with_room(64));

        let mut sink = Recorder::with_room(0);
        let report = demux.process(&DMA, 8 - 3, &mut sink);

        assert_eq!(sink.calls.len(), 2);
        assert_eq!(report.runs, 2);
        assert_eq!(report.dropped, 5);
        assert_eq!(demux.cursor(), 3);
    }

    #[test]
    fn process_dma_invalidates_before_every_pass() {
        use core::cell::Cell;

        struct CountingCache(Cell<usize>);
        impl CacheMaintenance for CountingCache {
            fn invalidate(&self, _addr: *const u8, len: usize) {
                assert_eq!(len, 8);
                self.0.set(self.0.get() + 1);
            }
        }

        let buffer = DmaRxBuffer::<8>::new();
        buffer.simulate_dma_write(0, &[1, 2, 3]);
        let cache = CountingCache(Cell::new(0));
        let mut demux = Demultiplexer::new();
        let ring = RingBuffer::<9>::new();
        let (mut tx, rx) = ring.split().unwrap();

        demux.process_dma(&buffer, &cache, || 5, &mut tx);
        demux.process_dma(&buffer, &cache, || 5, &mut tx);

        assert_eq!(cache.0.get(), 2);
        assert_eq!(rx.len(), 3);
    }
}
