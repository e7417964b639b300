//! Mock implementations for testing
//!
//! Simulated USART + circular DMA stream and a counting cache, so the whole
//! receive path runs on the host. The mock plays the DMA engine: bytes passed
//! to [`MockSerialPort::inject`] land in the armed receive buffer at the
//! engine's write position, which wraps exactly like circular mode.

use core::cell::RefCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use critical_section::Mutex;
use embassy_time::Duration;

use crate::config::ChannelId;
use crate::error::PortError;
use crate::event::LineErrors;
use crate::port::{CacheMaintenance, SerialPort};

/// Capacity of the captured transmit log.
pub const MOCK_TX_CAPACITY: usize = 256;

struct MockState {
    dma_addr: usize,
    dma_len: usize,
    write_pos: usize,
    armed: bool,
    arm_count: u32,
    pending: LineErrors,
    fail_next_arm: Option<PortError>,
    error_irq_enabled: bool,
    tx: heapless::Vec<u8, MOCK_TX_CAPACITY>,
    tx_stalled: bool,
}

/// Mock serial port with a circular receive DMA stream
pub struct MockSerialPort {
    id: ChannelId,
    state: Mutex<RefCell<MockState>>,
}

impl MockSerialPort {
    /// Create a port that is not yet armed.
    pub const fn new(id: ChannelId) -> Self {
        Self {
            id,
            state: Mutex::new(RefCell::new(MockState {
                dma_addr: 0,
                dma_len: 0,
                write_pos: 0,
                armed: false,
                arm_count: 0,
                pending: LineErrors::empty(),
                fail_next_arm: None,
                error_irq_enabled: true,
                tx: heapless::Vec::new(),
                tx_stalled: false,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }

    /// Receive `bytes` off the wire. Returns how many reached the DMA buffer:
    /// none while the stream is not armed or a line error is pending.
    #[allow(clippy::arithmetic_side_effects)] // Safety: write_pos < dma_len, dma_len > 0 when armed
    pub fn inject(&self, bytes: &[u8]) -> usize {
        self.with(|s| {
            if !s.armed || s.dma_len == 0 || s.pending.has_line_error() {
                return 0;
            }
            let base = s.dma_addr as *mut u8;
            for &byte in bytes {
                // SAFETY: the buffer was registered through start_circular_rx,
                // whose contract keeps it valid while armed; write_pos < dma_len.
                unsafe { base.add(s.write_pos).write_volatile(byte) };
                s.write_pos = (s.write_pos + 1) % s.dma_len;
            }
            bytes.len()
        })
    }

    /// Latch line-error flags, as the USART would on a bad character.
    pub fn raise_errors(&self, errors: LineErrors) {
        self.with(|s| s.pending |= errors);
    }

    /// Flags currently latched.
    pub fn pending_errors(&self) -> LineErrors {
        self.with(|s| s.pending)
    }

    /// Make the next `start_circular_rx` fail with `err`.
    pub fn fail_next_arm(&self, err: PortError) {
        self.with(|s| s.fail_next_arm = Some(err));
    }

    /// How many times reception was (re)armed.
    pub fn arm_count(&self) -> u32 {
        self.with(|s| s.arm_count)
    }

    /// `true` while the stream accepts bytes.
    pub fn is_armed(&self) -> bool {
        self.with(|s| s.armed)
    }

    /// Current engine write offset.
    pub fn write_offset(&self) -> usize {
        self.with(|s| s.write_pos)
    }

    /// Whether the USART's own line-error interrupt is enabled.
    pub fn error_interrupt_enabled(&self) -> bool {
        self.with(|s| s.error_irq_enabled)
    }

    /// Make transmits time out (`true`) or succeed (`false`).
    pub fn stall_transmit(&self, stalled: bool) {
        self.with(|s| s.tx_stalled = stalled);
    }

    /// Everything transmitted so far.
    pub fn transmitted(&self) -> heapless::Vec<u8, MOCK_TX_CAPACITY> {
        self.with(|s| s.tx.clone())
    }
}

impl SerialPort for MockSerialPort {
    fn id(&self) -> ChannelId {
        self.id
    }

    #[allow(clippy::arithmetic_side_effects)] // test counter
    unsafe fn start_circular_rx(&self, buffer: *mut u8, len: usize) -> Result<(), PortError> {
        self.with(|s| {
            if let Some(err) = s.fail_next_arm.take() {
                s.armed = false;
                return Err(err);
            }
            s.dma_addr = buffer as usize;
            s.dma_len = len;
            s.write_pos = 0;
            s.armed = true;
            s.arm_count += 1;
            Ok(())
        })
    }

    #[allow(clippy::arithmetic_side_effects)] // write_pos < dma_len
    fn dma_remaining(&self) -> usize {
        self.with(|s| s.dma_len - s.write_pos)
    }

    fn clear_error_flags(&self) -> LineErrors {
        self.with(|s| core::mem::take(&mut s.pending))
    }

    fn disable_error_interrupt(&self) {
        self.with(|s| s.error_irq_enabled = false);
    }

    fn transmit_blocking(&self, data: &[u8], _timeout: Duration) -> Result<(), PortError> {
        self.with(|s| {
            if s.tx_stalled {
                return Err(PortError::Timeout);
            }
            for &byte in data {
                // Log is bounded; overflowing bytes are not recorded.
                let _ = s.tx.push(byte);
            }
            Ok(())
        })
    }
}

/// Cache maintenance mock that counts invalidations
#[derive(Debug, Default)]
pub struct MockCache {
    invalidations: AtomicUsize,
    last_len: AtomicUsize,
}

impl MockCache {
    /// Create a counter at zero.
    pub const fn new() -> Self {
        Self {
            invalidations: AtomicUsize::new(0),
            last_len: AtomicUsize::new(0),
        }
    }

    /// Number of invalidate calls.
    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Length passed to the most recent invalidate call.
    pub fn last_len(&self) -> usize {
        self.last_len.load(Ordering::Relaxed)
    }
}

impl CacheMaintenance for MockCache {
    fn invalidate(&self, _addr: *const u8, len: usize) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        self.last_len.store(len, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn injected_bytes_wrap_inside_the_armed_buffer() {
        let port = MockSerialPort::new(ChannelId::Usart1);
        let mut dma = [0u8; 4];
        // SAFETY: `dma` lives until the end of the test.
        unsafe { port.start_circular_rx(dma.as_mut_ptr(), dma.len()) }.unwrap();

        assert_eq!(port.inject(&[1, 2, 3, 4, 5, 6]), 6);
        assert_eq!(port.dma_remaining(), 2);
        assert_eq!(dma, [5, 6, 3, 4]);
    }

    #[test]
    fn unarmed_or_errored_port_drops_input() {
        let port = MockSerialPort::new(ChannelId::Usart2);
        assert_eq!(port.inject(&[1]), 0);

        let mut dma = [0u8; 4];
        // SAFETY: as above.
        unsafe { port.start_circular_rx(dma.as_mut_ptr(), dma.len()) }.unwrap();
        port.raise_errors(LineErrors::OVERRUN);
        assert_eq!(port.inject(&[1]), 0);
        assert_eq!(port.clear_error_flags(), LineErrors::OVERRUN);
        assert_eq!(port.inject(&[1]), 1);
    }

    #[test]
    fn stalled_transmit_times_out() {
        let port = MockSerialPort::new(ChannelId::Usart3);
        port.transmit_blocking(b"ok", Duration::from_millis(1)).unwrap();
        port.stall_transmit(true);
        assert_eq!(
            port.transmit_blocking(b"no", Duration::from_millis(1)),
            Err(PortError::Timeout)
        );
        assert_eq!(port.transmitted().as_slice(), b"ok");
    }
}
