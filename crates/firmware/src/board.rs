//! Board wiring for the serial channels (NUCLEO-H743ZI).
//!
//! Pure data: pin assignments, DMA streams, DMAMUX request lines and clock
//! arithmetic. Nothing here touches hardware, so the whole table is checked by
//! host tests.
//!
//! | Channel | TX   | RX   | AF | DMA1 stream | DMAMUX request | Notes            |
//! |---------|------|------|----|-------------|----------------|------------------|
//! | USART1  | PB6  | PB7  | 7  | 0           | 41             | master port      |
//! | USART2  | PD5  | PD6  | 7  | 1           | 43             |                  |
//! | USART3  | PD8  | PD9  | 7  | 2           | 45             | ST-LINK VCP      |

use dma_uart::config::{channel_config, ChannelConfig};
use dma_uart::{ChannelId, UartConfig};
use embassy_time::Duration;

/// USART kernel clock: every APB bus runs at 100 MHz (see `boot`).
pub const USART_KERNEL_HZ: u32 = 100_000_000;

/// GPIO port letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GpioPort {
    /// GPIOB
    B,
    /// GPIOD
    D,
}

/// One GPIO pin in alternate-function mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AfPin {
    /// Port
    pub port: GpioPort,
    /// Pin number, 0..=15
    pub pin: u8,
    /// Alternate function number
    pub af: u8,
}

/// Everything the firmware needs to bring up one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SerialWiring {
    /// Channel this entry wires
    pub id: ChannelId,
    /// Transmit pin
    pub tx: AfPin,
    /// Receive pin
    pub rx: AfPin,
    /// DMA1 stream carrying the receive transfer
    pub dma_stream: u8,
    /// DMAMUX1 request id for the USART's RX line
    pub dmamux_request: u8,
}

impl SerialWiring {
    /// Wiring for `id`.
    pub const fn of(id: ChannelId) -> Self {
        const fn af7(port: GpioPort, pin: u8) -> AfPin {
            AfPin { port, pin, af: 7 }
        }
        match id {
            ChannelId::Usart1 => Self {
                id,
                tx: af7(GpioPort::B, 6),
                rx: af7(GpioPort::B, 7),
                dma_stream: 0,
                dmamux_request: 41,
            },
            ChannelId::Usart2 => Self {
                id,
                tx: af7(GpioPort::D, 5),
                rx: af7(GpioPort::D, 6),
                dma_stream: 1,
                dmamux_request: 43,
            },
            ChannelId::Usart3 => Self {
                id,
                tx: af7(GpioPort::D, 8),
                rx: af7(GpioPort::D, 9),
                dma_stream: 2,
                dmamux_request: 45,
            },
        }
    }

    /// The driver-side configuration entry for this channel.
    pub const fn config(&self) -> ChannelConfig {
        channel_config(self.id)
    }
}

/// Channels compiled into this firmware, selected by the `usart1`, `usart2`
/// and `usart3` cargo features.
pub fn enabled_channels() -> heapless::Vec<ChannelId, 3> {
    let mut ids = heapless::Vec::new();
    for id in ChannelId::ALL {
        if is_enabled(id) {
            // Capacity equals ChannelId::ALL.len()
            let _ = ids.push(id);
        }
    }
    ids
}

/// `true` when `id` is compiled in.
pub const fn is_enabled(id: ChannelId) -> bool {
    match id {
        ChannelId::Usart1 => cfg!(feature = "usart1"),
        ChannelId::Usart2 => cfg!(feature = "usart2"),
        ChannelId::Usart3 => cfg!(feature = "usart3"),
    }
}

/// USART_BRR value for 16x oversampling, rounded to nearest.
///
/// Returns `None` when the divider falls outside the register's 16..=0xFFFF
/// range.
#[allow(clippy::arithmetic_side_effects)] // baud != 0 checked; kernel_hz + baud/2 fits in u64
pub const fn brr(kernel_hz: u32, baud: u32) -> Option<u16> {
    if baud == 0 {
        return None;
    }
    let div = (kernel_hz as u64 + baud as u64 / 2) / baud as u64;
    if div < 16 || div > 0xFFFF {
        None
    } else {
        Some(div as u16)
    }
}

/// How often the DMA watch task samples half/full transfer flags.
///
/// A quarter of the time the engine needs to fill the buffer, so each half of
/// the buffer is collected well before the engine wraps onto it. Never below
/// 100 µs.
#[allow(clippy::arithmetic_side_effects)] // char time is at most tens of ms; dma_len <= 64 KiB
pub const fn dma_poll_interval(uart: &UartConfig, dma_len: usize) -> Duration {
    let fill_us = uart.char_time().as_micros() * dma_len as u64;
    let quarter = fill_us / 4;
    if quarter < 100 {
        Duration::from_micros(100)
    } else {
        Duration::from_micros(quarter)
    }
}

/// Transmit timeout for `len` bytes: twice the wire time plus 10 ms slack.
#[allow(clippy::arithmetic_side_effects)] // len is a buffer length; no overflow in u64 micros
pub const fn transmit_timeout(uart: &UartConfig, len: usize) -> Duration {
    let wire_us = uart.char_time().as_micros() * len as u64;
    Duration::from_micros(wire_us * 2 + 10_000)
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[test]
    fn every_channel_has_distinct_stream_and_request() {
        let wiring = ChannelId::ALL.map(SerialWiring::of);
        for (i, a) in wiring.iter().enumerate() {
            assert_eq!(a.id, ChannelId::ALL[i]);
            for b in wiring.iter().skip(i + 1) {
                assert_ne!(a.dma_stream, b.dma_stream);
                assert_ne!(a.dmamux_request, b.dmamux_request);
            }
        }
    }

    #[test]
    fn rx_request_ids_follow_the_dmamux_table() {
        // RM0433 DMAMUX1: usartN_rx_dma is 39 + 2N for N = 1..=3
        for (n, id) in (1u8..).zip(ChannelId::ALL) {
            assert_eq!(SerialWiring::of(id).dmamux_request, 39 + 2 * n);
        }
    }

    #[test]
    fn brr_for_115200_at_100mhz() {
        assert_eq!(brr(USART_KERNEL_HZ, 115_200), Some(868));
        assert_eq!(brr(USART_KERNEL_HZ, 0), None);
        assert_eq!(brr(USART_KERNEL_HZ, 10_000_000), None);
        assert_eq!(brr(100_000_000, 1_000), None);
    }

    #[test]
    fn default_build_enables_all_three_channels() {
        let ids = enabled_channels();
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|&id| is_enabled(id)));
    }

    #[test]
    fn poll_interval_is_a_quarter_of_the_fill_time() {
        let uart = SerialWiring::of(ChannelId::Usart3).config().uart;
        // 87 µs per 8N1 character at 115200, 32-byte buffer
        assert_eq!(dma_poll_interval(&uart, 32), Duration::from_micros(87 * 32 / 4));

        let fast = UartConfig {
            baud_rate: 12_000_000,
            ..uart
        };
        assert_eq!(dma_poll_interval(&fast, 32), Duration::from_micros(100));
    }

    #[test]
    fn transmit_timeout_scales_with_length() {
        let uart = SerialWiring::of(ChannelId::Usart1).config().uart;
        assert!(transmit_timeout(&uart, 100) > transmit_timeout(&uart, 1));
        assert!(transmit_timeout(&uart, 0) >= Duration::from_millis(10));
    }
}
