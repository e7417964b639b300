//! DMA receive buffer with Cortex-M7 cache-line alignment.
//!
//! The STM32H743ZI Cortex-M7 has a 32-byte cacheline. A receive buffer that
//! the DMA engine writes while the D-cache is enabled must be aligned to (and
//! sized in multiples of) a cacheline, otherwise invalidating it would also
//! throw away CPU writes to whatever variable shares its first or last line.
//!
//! # The Problem
//!
//! The CPU may hold a stale cached copy of the buffer. After the DMA engine
//! writes new bytes to RAM, a plain read returns the old cached bytes.
//!
//! # The Solution
//!
//! The demultiplexer invalidates the whole buffer range (through
//! [`CacheMaintenance`](crate::CacheMaintenance)) before every pass, then
//! reads. On cores without a data cache the invalidation is a no-op.
//!
//! # References
//! - ST AN4839: Level 1 cache on STM32F7 Series and STM32H7 Series
//! - ARM DDI0489F §B3.5: Cache coherency

use core::cell::UnsafeCell;

/// A `#[repr(align(32))]` byte array written by a DMA engine in circular
/// mode and only ever read by the CPU.
///
/// # Example
///
/// ```
/// use dma_uart::DmaRxBuffer;
///
/// static RX_DMA: DmaRxBuffer<32> = DmaRxBuffer::new();
/// assert_eq!(RX_DMA.as_ptr() as usize % 32, 0);
/// ```
#[repr(C, align(32))]
pub struct DmaRxBuffer<const N: usize> {
    bytes: UnsafeCell<[u8; N]>,
}

// SAFETY: the CPU never writes through a shared reference; the only writer is
// the DMA engine, armed through `as_mut_ptr`. Reads go through `snapshot`,
// which is valid for the region the engine is not currently writing (see its
// docs), so sharing the buffer between the RX interrupt and the task that
// armed it does not create a data race in Rust's model.
unsafe impl<const N: usize> Sync for DmaRxBuffer<N> {}

impl<const N: usize> DmaRxBuffer<N> {
    /// Zeroed buffer, usable in a `static`.
    pub const fn new() -> Self {
        Self {
            bytes: UnsafeCell::new([0; N]),
        }
    }

    /// Buffer length in bytes.
    pub const fn len(&self) -> usize {
        N
    }

    /// `true` for a zero-length buffer.
    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    /// Start address, for cache maintenance.
    pub const fn as_ptr(&self) -> *const u8 {
        self.bytes.get().cast::<u8>().cast_const()
    }

    /// Start address handed to the DMA engine when arming reception.
    pub const fn as_mut_ptr(&self) -> *mut u8 {
        self.bytes.get().cast::<u8>()
    }

    /// View the buffer contents.
    ///
    /// In circular mode the engine writes strictly ahead of the demultiplexer
    /// cursor and never laps it between two notifications, so the bytes the
    /// demultiplexer copies out of this view are stable while it reads them.
    pub fn snapshot(&self) -> &[u8] {
        // SAFETY: the pointer comes from a live UnsafeCell<[u8; N]> and N bytes
        // are in bounds. The CPU never writes through this type; the hardware
        // writer is outside the Rust abstract machine and, per the circular
        // mode contract above, does not touch the region being copied.
        unsafe { core::slice::from_raw_parts(self.as_ptr(), N) }
    }

    /// Overwrite bytes as the DMA engine would.
    #[cfg(test)]
    pub(crate) fn simulate_dma_write(&self, offset: usize, data: &[u8]) {
        let len = data.len().min(N.saturating_sub(offset));
        if len == 0 {
            return;
        }
        // SAFETY: offset + len <= N by the clamp above; used by the mock
        // hardware, which plays the role of the DMA engine.
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), self.as_mut_ptr().add(offset), len);
        }
    }
}

impl<const N: usize> Default for DmaRxBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
