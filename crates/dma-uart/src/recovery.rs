//! Line-error recovery policy.
//!
//! # Background
//!
//! Once the USART flags an overrun, framing, parity or noise error, the HAL
//! aborts the receive DMA stream and stops delivering RX events. The channel
//! would stay deaf until power-off. The line-error interrupt itself is left
//! disabled (see [`Channel::init`](crate::Channel::init)) so a noisy line
//! cannot turn into an interrupt storm; errors are only seen through the
//! error notification.
//!
//! **Recovery procedure** (runs in the error notification, interrupt context):
//! 1. Drain: one demultiplex pass so bytes already written by the engine reach
//!    the ring buffer before the stream is restarted.
//! 2. Clear every status flag: overrun, framing, parity, noise, idle and
//!    character match. Some of these are never set by a DMA receive; clearing
//!    all of them leaves the peripheral in a known state.
//! 3. Re-arm circular reception at offset 0 of the DMA buffer.
//! 4. Rewind the demultiplexer cursor to 0 to match the re-armed stream.
//!
//! A byte that was half-received when the error hit is lost. Everything
//! already in the ring buffer is kept. Recovery never escalates: there is no
//! terminal error state.

use crate::config::ChannelId;
use crate::demux::DemuxReport;
use crate::error::PortError;
use crate::event::LineErrors;
use crate::port::SerialPort;

/// What the error notification handler did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecoveryOutcome {
    /// Flags cleared and reception restarted at offset 0.
    Rearmed {
        /// Flags that were pending when the handler ran
        cleared: LineErrors,
        /// The drain pass run before restarting
        drained: DemuxReport,
    },
    /// The notification named another channel; nothing was touched.
    ForeignChannel(ChannelId),
    /// The channel was never initialised; nothing to recover.
    NotRunning,
    /// Flags were cleared but the stream could not be restarted. The next
    /// error notification retries.
    RearmFailed(PortError),
}

impl RecoveryOutcome {
    /// `true` when reception is running again.
    pub const fn is_rearmed(&self) -> bool {
        matches!(self, Self::Rearmed { .. })
    }
}

/// Steps 2 and 3 of the procedure: clear all flags, restart reception.
///
/// # Safety
///
/// Same contract as [`SerialPort::start_circular_rx`].
pub(crate) unsafe fn clear_and_rearm<P: SerialPort + ?Sized>(
    port: &P,
    buffer: *mut u8,
    len: usize,
) -> Result<LineErrors, (LineErrors, PortError)> {
    let cleared = port.clear_error_flags();
    if cleared.has_line_error() {
        #[cfg(feature = "defmt")]
        defmt::warn!("{=str}: line error {=u8:#x}, re-arming rx dma", port.id().name(), cleared.bits());
    }
    // SAFETY: forwarded from the caller.
    match unsafe { port.start_circular_rx(buffer, len) } {
        Ok(()) => Ok(cleared),
        Err(err) => Err((cleared, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockSerialPort;

    #[test]
    fn clears_all_flags_then_rearms() {
        let port = MockSerialPort::new(ChannelId::Usart1);
        port.raise_errors(LineErrors::OVERRUN | LineErrors::FRAMING);
        let mut dma = [0u8; 8];

        // SAFETY: `dma` outlives the mock's use of the pointer in this test.
        let result = unsafe { clear_and_rearm(&port, dma.as_mut_ptr(), dma.len()) };

        assert_eq!(result, Ok(LineErrors::OVERRUN | LineErrors::FRAMING));
        assert!(port.pending_errors().is_empty());
        assert_eq!(port.arm_count(), 1);
    }

    #[test]
    fn rearm_failure_still_reports_cleared_flags() {
        let port = MockSerialPort::new(ChannelId::Usart2);
        port.raise_errors(LineErrors::NOISE);
        port.fail_next_arm(PortError::Dma);
        let mut dma = [0u8; 8];

        // SAFETY: as above.
        let result = unsafe { clear_and_rearm(&port, dma.as_mut_ptr(), dma.len()) };

        assert_eq!(result, Err((LineErrors::NOISE, PortError::Dma)));
        assert!(port.pending_errors().is_empty());
    }

    #[test]
    fn only_rearmed_counts_as_running() {
        assert!(!RecoveryOutcome::NotRunning.is_rearmed());
        assert!(!RecoveryOutcome::ForeignChannel(ChannelId::Usart3).is_rearmed());
        assert!(RecoveryOutcome::Rearmed {
            cleared: LineErrors::empty(),
            drained: DemuxReport::default(),
        }
        .is_rearmed());
    }
}
