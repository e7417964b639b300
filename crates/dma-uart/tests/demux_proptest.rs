//! Property-based tests for the demultiplexer and the channel stream.
//! Verifies exactly-once, in-order delivery for arbitrary arrival patterns.

#![allow(clippy::arithmetic_side_effects)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::cast_possible_truncation)]

use dma_uart::mocks::{MockCache, MockSerialPort};
use dma_uart::{ByteSink, Channel, ChannelId, Demultiplexer, RxEvent};
use proptest::prelude::*;

const DMA_LEN: usize = 16;

struct VecSink(Vec<u8>);

impl ByteSink for VecSink {
    fn append(&mut self, bytes: &[u8]) -> usize {
        self.0.extend_from_slice(bytes);
        bytes.len()
    }
}

fn event(kind: u8) -> RxEvent {
    match kind % 4 {
        0 => RxEvent::Idle,
        1 => RxEvent::HalfTransfer,
        2 => RxEvent::TransferComplete,
        _ => RxEvent::Other(kind),
    }
}

proptest! {
    /// One pass appends exactly the bytes between the cursor and the new
    /// offset, modulo the buffer length.
    #[test]
    fn pass_appends_distance_from_cursor(cursor in 0usize..DMA_LEN, remaining in 0usize..=DMA_LEN) {
        let dma: Vec<u8> = (0..DMA_LEN as u8).collect();
        let mut demux = Demultiplexer::new();
        let mut sink = VecSink(Vec::new());
        demux.process(&dma, DMA_LEN - cursor, &mut sink);
        prop_assert_eq!(demux.cursor(), cursor);
        sink.0.clear();

        let report = demux.process(&dma, remaining, &mut sink);

        let offset = (DMA_LEN - remaining) % DMA_LEN;
        let expected = (offset + DMA_LEN - cursor) % DMA_LEN;
        prop_assert_eq!(report.offset, offset);
        prop_assert_eq!(report.appended, expected);
        prop_assert_eq!(sink.0.len(), expected);
        prop_assert_eq!(demux.cursor(), offset);
        for (i, &b) in sink.0.iter().enumerate() {
            prop_assert_eq!(b as usize, (cursor + i) % DMA_LEN);
        }
    }

    /// Out-of-range remaining counts are clamped, never panic.
    #[test]
    fn oversized_remaining_is_clamped(remaining in (DMA_LEN + 1)..usize::MAX) {
        let dma = [0u8; DMA_LEN];
        let mut demux = Demultiplexer::new();
        let mut sink = VecSink(Vec::new());
        let report = demux.process(&dma, remaining, &mut sink);
        prop_assert!(report.clamped);
        prop_assert!(report.is_noop());
        prop_assert_eq!(demux.cursor(), 0);
    }

    /// Whatever the chunking and event kinds, the consumer reads back the
    /// exact byte stream that went over the wire, as long as each chunk is
    /// collected before the engine laps the cursor.
    #[test]
    fn channel_delivers_each_byte_once_in_order(
        chunks in proptest::collection::vec((1usize..DMA_LEN, any::<u8>(), any::<bool>()), 1..40)
    ) {
        let ch: Channel<'_, MockSerialPort, MockCache, DMA_LEN, 65> =
            Channel::new(ChannelId::Usart3, MockSerialPort::new(ChannelId::Usart3), MockCache::new());
        let mut rx = ch.init().unwrap();

        let mut sent = Vec::new();
        let mut received = Vec::new();
        let mut counter = 0u8;
        for (len, kind, drain) in chunks {
            let chunk: Vec<u8> = (0..len)
                .map(|_| {
                    counter = counter.wrapping_add(1);
                    counter
                })
                .collect();
            ch.port().inject(&chunk);
            sent.extend_from_slice(&chunk);
            ch.on_rx_event(event(kind));

            if drain || rx.available() > 32 {
                let mut buf = [0u8; 64];
                let n = rx.read_buffered(&mut buf);
                received.extend_from_slice(&buf[..n]);
            }
        }
        let mut buf = [0u8; 64];
        let n = rx.read_buffered(&mut buf);
        received.extend_from_slice(&buf[..n]);

        prop_assert_eq!(received, sent);
    }
}
