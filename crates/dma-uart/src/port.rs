//! Hardware boundary
//!
//! The channel controller never touches registers directly. Everything it
//! needs from the USART, its DMA stream and the core's data cache goes through
//! the two traits in this module, implemented by the firmware crate for the
//! STM32H7 and by [`mocks`](crate::mocks) for host tests.
//!
//! All methods take `&self`: the same port is used from the RX interrupt
//! (remaining count, flag clearing, re-arming) and from the consumer task
//! (transmit). Implementations must make each call safe to run from either
//! context.

use embassy_time::Duration;

use crate::config::ChannelId;
use crate::error::PortError;
use crate::event::LineErrors;

/// One USART with a circular receive DMA stream attached.
pub trait SerialPort {
    /// Physical channel this port drives.
    fn id(&self) -> ChannelId;

    /// Abort any receive transfer in flight and start circular DMA reception
    /// of `len` bytes into `buffer`, with idle-line, half-transfer and
    /// transfer-complete notifications enabled.
    ///
    /// # Safety
    ///
    /// `buffer` must be valid for `len` bytes for as long as reception stays
    /// armed, and the CPU must not write to it while the engine owns it.
    unsafe fn start_circular_rx(&self, buffer: *mut u8, len: usize) -> Result<(), PortError>;

    /// The DMA stream's "bytes remaining" counter.
    fn dma_remaining(&self) -> usize;

    /// Clear every pending line-error and status flag. Returns the flags that
    /// were set when the call was made.
    fn clear_error_flags(&self) -> LineErrors;

    /// Stop the USART from raising its own line-error interrupt. Errors are
    /// then observed and cleared only from the error notification path.
    fn disable_error_interrupt(&self);

    /// Blocking write of all of `data`, giving up after `timeout`.
    fn transmit_blocking(&self, data: &[u8], timeout: Duration) -> Result<(), PortError>;
}

/// Data-cache maintenance for DMA-written memory.
pub trait CacheMaintenance {
    /// `true` when the CPU already sees DMA writes and
    /// [`invalidate`](Self::invalidate) does nothing.
    const COHERENT: bool = false;

    /// Discard cached copies of `len` bytes starting at `addr` so the next CPU
    /// read fetches what the DMA engine wrote to RAM.
    fn invalidate(&self, addr: *const u8, len: usize);
}

/// Cache maintenance for cores whose data path is coherent with DMA (or has
/// no data cache at all).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCacheMaintenance;

impl CacheMaintenance for NoCacheMaintenance {
    const COHERENT: bool = true;

    #[inline]
    fn invalidate(&self, _addr: *const u8, _len: usize) {}
}

/// UART configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartConfig {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits
    pub data_bits: DataBits,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
}

impl UartConfig {
    /// Duration of one character on the wire (start + data + parity + stop),
    /// rounded up to whole microseconds.
    ///
    /// Used to size transmit timeouts: sending `n` bytes cannot finish faster
    /// than `n` character times.
    #[allow(clippy::arithmetic_side_effects)] // at most 26 half-bits; no overflow in u64
    pub const fn char_time(&self) -> Duration {
        if self.baud_rate == 0 {
            return Duration::from_micros(0);
        }
        let half_bits =
            2 * (1 + self.data_bits.bits() + self.parity.bits()) + self.stop_bits.half_bits();
        let micros = (half_bits as u64 * 1_000_000).div_ceil(2 * self.baud_rate as u64);
        Duration::from_micros(micros)
    }

    /// USART word length: data bits plus the parity bit, if any.
    #[allow(clippy::arithmetic_side_effects)] // at most 10
    pub const fn word_length(&self) -> u32 {
        self.data_bits.bits() + self.parity.bits()
    }
}

/// Data bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataBits {
    /// 7 data bits
    Seven,
    /// 8 data bits
    Eight,
    /// 9 data bits
    Nine,
}

impl DataBits {
    const fn bits(self) -> u32 {
        match self {
            Self::Seven => 7,
            Self::Eight => 8,
            Self::Nine => 9,
        }
    }
}

/// Parity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parity {
    /// No parity
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

impl Parity {
    const fn bits(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Even | Self::Odd => 1,
        }
    }
}

/// Stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopBits {
    /// 1 stop bit
    One,
    /// 1.5 stop bits
    OnePointFive,
    /// 2 stop bits
    Two,
}

impl StopBits {
    // In half-bit units so 1.5 stays exact.
    const fn half_bits(self) -> u32 {
        match self {
            Self::One => 2,
            Self::OnePointFive => 3,
            Self::Two => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_time_8n1_at_115200() {
        let cfg = UartConfig {
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        };
        // 10 bits / 115200 baud = 86.8 us, rounded up.
        assert_eq!(cfg.char_time(), Duration::from_micros(87));
    }

    #[test]
    fn char_time_counts_parity_and_stop_bits() {
        let cfg = UartConfig {
            baud_rate: 9_600,
            data_bits: DataBits::Eight,
            parity: Parity::Even,
            stop_bits: StopBits::Two,
        };
        // 12 bits / 9600 baud = 1250 us exactly.
        assert_eq!(cfg.char_time(), Duration::from_micros(1250));
    }

    #[test]
    fn word_length_includes_parity() {
        let cfg = UartConfig {
            baud_rate: 9_600,
            data_bits: DataBits::Eight,
            parity: Parity::Odd,
            stop_bits: StopBits::One,
        };
        assert_eq!(cfg.word_length(), 9);
        assert_eq!(
            UartConfig {
                data_bits: DataBits::Seven,
                parity: Parity::None,
                ..cfg
            }
            .word_length(),
            7
        );
    }
}
