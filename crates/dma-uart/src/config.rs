//! Channel configuration and buffer sizing constants
//!
//! Every physical serial channel on the board is described by one
//! [`ChannelConfig`] entry in [`CHANNEL_TABLE`]. The firmware instantiates a
//! [`Channel`](crate::Channel) per enabled entry instead of duplicating the
//! driver per USART.

use crate::port::{CacheMaintenance, DataBits, Parity, StopBits, UartConfig};

/// Data-cache line size of the Cortex-M7 core, in bytes.
///
/// DMA receive buffers are aligned to, and sized in multiples of, this value
/// so that invalidating the buffer never touches a neighbouring variable.
pub const DCACHE_LINE_BYTES: usize = 32;

/// Length of each channel's circular DMA receive buffer.
pub const RX_DMA_BUF_LEN: usize = 32;

/// Length of each channel's ring buffer storage.
///
/// One slot is kept free to tell "full" from "empty", so 2^n + 1 storage
/// bytes give exactly 2^n usable bytes.
pub const RX_RING_LEN: usize = 129;

/// Default line rate for every channel in the table.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Physical serial channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelId {
    /// USART1, master serial port
    Usart1,
    /// USART2
    Usart2,
    /// USART3
    Usart3,
}

impl ChannelId {
    /// All channel identifiers, in table order.
    pub const ALL: [Self; 3] = [Self::Usart1, Self::Usart2, Self::Usart3];

    /// Short peripheral name, for diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Usart1 => "USART1",
            Self::Usart2 => "USART2",
            Self::Usart3 => "USART3",
        }
    }

    /// Position of this channel in [`CHANNEL_TABLE`].
    pub const fn index(self) -> usize {
        match self {
            Self::Usart1 => 0,
            Self::Usart2 => 1,
            Self::Usart3 => 2,
        }
    }
}

/// Static description of one serial receive channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelConfig {
    /// Which peripheral this entry describes
    pub id: ChannelId,
    /// Circular DMA buffer length in bytes
    pub dma_len: usize,
    /// Ring buffer storage length in bytes (usable capacity is one less)
    pub ring_len: usize,
    /// `false` when the core's D-cache is not coherent with DMA writes and
    /// the receive buffer must be invalidated before every read
    pub cache_coherent: bool,
    /// Line settings
    pub uart: UartConfig,
}

impl ChannelConfig {
    /// Default 115200 8N1 entry with the standard buffer sizes.
    pub const fn standard(id: ChannelId) -> Self {
        Self {
            id,
            dma_len: RX_DMA_BUF_LEN,
            ring_len: RX_RING_LEN,
            cache_coherent: false,
            uart: UartConfig {
                baud_rate: DEFAULT_BAUD_RATE,
                data_bits: DataBits::Eight,
                parity: Parity::None,
                stop_bits: StopBits::One,
            },
        }
    }

    /// Bytes the ring buffer can hold before appends start dropping data.
    pub const fn ring_capacity(&self) -> usize {
        self.ring_len.saturating_sub(1)
    }

    /// `true` when `C` is the right cache maintenance for this entry: a no-op
    /// on coherent cores, a real invalidate everywhere else.
    pub const fn uses_cache<C: CacheMaintenance>(&self) -> bool {
        self.cache_coherent == C::COHERENT
    }

    /// `true` when the DMA buffer covers whole cache lines only.
    pub const fn is_cache_line_sized(&self) -> bool {
        self.dma_len != 0 && self.dma_len % DCACHE_LINE_BYTES == 0
    }
}

/// One entry per physical channel, indexed by [`ChannelId::index`].
pub const CHANNEL_TABLE: [ChannelConfig; 3] = [
    ChannelConfig::standard(ChannelId::Usart1),
    ChannelConfig::standard(ChannelId::Usart2),
    ChannelConfig::standard(ChannelId::Usart3),
];

/// Look up the table entry for `id`.
pub const fn channel_config(id: ChannelId) -> ChannelConfig {
    match id {
        ChannelId::Usart1 => CHANNEL_TABLE[0],
        ChannelId::Usart2 => CHANNEL_TABLE[1],
        ChannelId::Usart3 => CHANNEL_TABLE[2],
    }
}

// Compile-time layout checks for the shipped table.
#[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]
const _: () = {
    let mut i = 0;
    while i < CHANNEL_TABLE.len() {
        assert!(CHANNEL_TABLE[i].is_cache_line_sized());
        assert!(CHANNEL_TABLE[i].ring_len >= 2);
        assert!(CHANNEL_TABLE[i].id.index() == i);
        i += 1;
    }
};
