//! Channel controller
//!
//! One [`Channel`] owns everything a physical serial receive path needs: the
//! DMA receive buffer, the ring buffer, the demultiplexer cursor, the idle
//! wake signal and the hardware port. It is `const`-constructible so each
//! board channel lives in a `static`, and every hardware notification for that
//! USART is routed to it (see [`Router`](crate::Router)).
//!
//! # Execution contexts
//!
//! | Operation                          | Context          | Ring endpoint    |
//! |------------------------------------|------------------|------------------|
//! | [`Channel::on_rx_event`]           | RX interrupt     | producer         |
//! | [`Channel::on_error`]              | error interrupt  | producer         |
//! | [`SerialRx::receive`] and friends  | application task | consumer         |
//! | [`Channel::transmit`]              | any task         | -                |
//!
//! [`Channel::init`] splits the ring once. The producer stays inside the
//! channel, next to the demultiplexer, under a critical section so the two
//! interrupt paths never interleave even at different priorities. The
//! consumer moves into the one [`SerialRx`] handed out, and all consuming
//! operations take `&mut self` on it. The ring itself is never locked.
//!
//! # State machine
//!
//! ```text
//! Uninitialized ──init()──▶ Running ◀─┐ rx event / error recovery
//!                                     └─┘
//! ```

use core::cell::RefCell;
use core::sync::atomic::{AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant};
use heapless::spsc::{Consumer, Producer};

use crate::config::ChannelId;
use crate::demux::{DemuxReport, Demultiplexer};
use crate::dma_buffer::DmaRxBuffer;
use crate::error::SerialError;
use crate::event::RxEvent;
use crate::port::{CacheMaintenance, SerialPort};
use crate::recovery::{self, RecoveryOutcome};
use crate::ring_buffer::{self, RingBuffer};

const STATE_UNINITIALIZED: u8 = 0;
const STATE_STARTING: u8 = 1;
const STATE_RUNNING: u8 = 2;

/// Lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelState {
    /// Constructed, DMA not armed
    Uninitialized,
    /// Inside `init()`
    Starting,
    /// Receiving; stays here until power-off
    Running,
}

/// Idle-line wake signal: binary, at most one pending wake-up.
pub type IdleSignal = Signal<CriticalSectionRawMutex, ()>;

/// Interrupt-side state: the cursor and the ring's producer endpoint.
struct RxPath<'a> {
    demux: Demultiplexer,
    producer: Option<Producer<'a, u8>>,
}

/// One serial receive channel.
///
/// - `'a`: how long the channel is borrowed once running (`'static` on the
///   board)
/// - `P`: hardware port (USART + RX DMA stream)
/// - `C`: data-cache maintenance for the DMA buffer
/// - `DMA`: circular DMA buffer length
/// - `RB`: ring buffer storage length (holds `RB - 1` bytes)
pub struct Channel<'a, P, C, const DMA: usize, const RB: usize> {
    id: ChannelId,
    port: P,
    cache: C,
    dma: DmaRxBuffer<DMA>,
    ring: RingBuffer<RB>,
    rx: Mutex<CriticalSectionRawMutex, RefCell<RxPath<'a>>>,
    idle: IdleSignal,
    state: AtomicU8,
}

impl<'a, P, C, const DMA: usize, const RB: usize> Channel<'a, P, C, DMA, RB>
where
    P: SerialPort,
    C: CacheMaintenance,
{
    const LAYOUT_OK: () = assert!(DMA > 0, "DMA receive buffer must not be empty");

    /// Create an uninitialised channel. Nothing touches the hardware until
    /// [`init`](Self::init).
    pub const fn new(id: ChannelId, port: P, cache: C) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::LAYOUT_OK;
        Self {
            id,
            port,
            cache,
            dma: DmaRxBuffer::new(),
            ring: RingBuffer::new(),
            rx: Mutex::new(RefCell::new(RxPath {
                demux: Demultiplexer::new(),
                producer: None,
            })),
            idle: Signal::new(),
            state: AtomicU8::new(STATE_UNINITIALIZED),
        }
    }

    /// Start reception and hand out the channel's only consumer handle.
    ///
    /// Rewinds the demultiplexer cursor, arms circular DMA reception into the
    /// receive buffer, disables the USART's own line-error interrupt (line
    /// errors are recovered from the error notification instead), then splits
    /// the ring between the interrupt path and the returned handle.
    ///
    /// Fails with [`SerialError::AlreadyRunning`] on a second call, and with
    /// [`SerialError::InvalidArgument`] if the port drives a different USART
    /// than this channel was built for. After a failed arm the channel is
    /// back to uninitialised and `init` may be retried.
    pub fn init(&'a self) -> Result<SerialRx<'a, P, C, DMA, RB>, SerialError> {
        if self.port.id() != self.id {
            return Err(SerialError::InvalidArgument);
        }
        if self
            .state
            .compare_exchange(
                STATE_UNINITIALIZED,
                STATE_STARTING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(SerialError::AlreadyRunning);
        }

        self.idle.reset();
        self.with_rx_path(|path| path.demux.rewind());

        // SAFETY: the DMA buffer is owned by `self` and lives as long as the
        // channel; the CPU never writes it.
        if let Err(err) = unsafe { self.port.start_circular_rx(self.dma.as_mut_ptr(), DMA) } {
            self.state.store(STATE_UNINITIALIZED, Ordering::Release);
            #[cfg(feature = "defmt")]
            defmt::error!("{=str}: failed to arm rx dma: {}", self.id.name(), err);
            return Err(err.into());
        }
        self.port.disable_error_interrupt();

        // Events raised between arming and here are ignored (state is still
        // Starting); their bytes stay in the DMA buffer for the next pass.
        let Some((producer, consumer)) = self.ring.split() else {
            return Err(SerialError::AlreadyRunning);
        };
        self.with_rx_path(|path| path.producer = Some(producer));
        self.state.store(STATE_RUNNING, Ordering::Release);

        #[cfg(feature = "defmt")]
        defmt::info!(
            "{=str}: rx running (dma {=usize} B, ring {=usize} B)",
            self.id.name(),
            DMA,
            self.ring.capacity()
        );
        Ok(SerialRx {
            channel: self,
            consumer,
        })
    }

    /// Receive-event notification from the hardware (interrupt context).
    ///
    /// Copies every byte the DMA engine wrote since the previous pass into the
    /// ring buffer, then wakes the consumer on [`RxEvent::Idle`]. Half- and
    /// full-transfer events only copy: a stream in progress is not a message
    /// boundary.
    pub fn on_rx_event(&self, event: RxEvent) -> DemuxReport {
        if !self.is_running() {
            #[cfg(feature = "defmt")]
            defmt::debug!("{=str}: rx event before init ignored", self.id.name());
            return DemuxReport::default();
        }

        let report = self.with_rx_path(|path| self.demux_pass(path)).unwrap_or_default();

        if event.wakes_consumer() {
            self.idle.signal(());
        } else if let RxEvent::Other(_kind) = event {
            #[cfg(feature = "defmt")]
            defmt::warn!("{=str}: unexpected rx event kind {=u8}", self.id.name(), _kind);
        }

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "{=str}: rx {} -> offset {=usize}, +{=usize} B",
            self.id.name(),
            event,
            report.offset,
            report.appended
        );
        report
    }

    /// Error notification from the hardware (interrupt context).
    ///
    /// `source` is the USART the notification was raised for; anything other
    /// than this channel's own USART is a diagnostic-only no-op. Otherwise
    /// drains what the engine already wrote, clears every error flag, re-arms
    /// reception at offset 0 and rewinds the cursor to match.
    pub fn on_error(&self, source: ChannelId) -> RecoveryOutcome {
        if source != self.id {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "{=str}: error notification for {=str} ignored",
                self.id.name(),
                source.name()
            );
            return RecoveryOutcome::ForeignChannel(source);
        }
        if !self.is_running() {
            return RecoveryOutcome::NotRunning;
        }

        self.with_rx_path(|path| {
            let drained = self.demux_pass(path);

            // SAFETY: as in `init`.
            let rearmed =
                unsafe { recovery::clear_and_rearm(&self.port, self.dma.as_mut_ptr(), DMA) };
            path.demux.rewind();
            match rearmed {
                Ok(cleared) => RecoveryOutcome::Rearmed { cleared, drained },
                Err((_, err)) => {
                    #[cfg(feature = "defmt")]
                    defmt::error!("{=str}: rx dma re-arm failed: {}", self.id.name(), err);
                    RecoveryOutcome::RearmFailed(err)
                }
            }
        })
        .unwrap_or(RecoveryOutcome::NotRunning)
    }

    /// Blocking transmit straight to the hardware; no buffering, no retry
    /// beyond what `timeout` allows.
    pub fn transmit(&self, data: &[u8], timeout: Duration) -> Result<(), SerialError> {
        if data.is_empty() {
            return Err(SerialError::InvalidArgument);
        }
        self.port
            .transmit_blocking(data, timeout)
            .map_err(SerialError::from)
    }

    /// The USART this channel serves.
    pub const fn id(&self) -> ChannelId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        match self.state.load(Ordering::Acquire) {
            STATE_STARTING => ChannelState::Starting,
            STATE_RUNNING => ChannelState::Running,
            _ => ChannelState::Uninitialized,
        }
    }

    /// `true` once `init()` has armed reception.
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_RUNNING
    }

    /// Demultiplexer cursor: DMA offset up to which bytes were copied out.
    pub fn cursor(&self) -> usize {
        self.with_rx_path(|path| path.demux.cursor()).unwrap_or_default()
    }

    /// Bytes waiting in the ring buffer (0 before `init`).
    pub fn buffered(&self) -> usize {
        self.with_rx_path(|path| path.producer.as_ref().map_or(0, Producer::len))
            .unwrap_or_default()
    }

    /// Maximum number of bytes the ring buffer holds.
    pub const fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// The hardware port.
    pub const fn port(&self) -> &P {
        &self.port
    }

    /// The cache maintenance implementation.
    pub const fn cache(&self) -> &C {
        &self.cache
    }

    /// The idle-line wake signal.
    pub const fn idle_signal(&self) -> &IdleSignal {
        &self.idle
    }

    /// Run `f` on the interrupt-side state inside a critical section. `None`
    /// if the state is already borrowed (a re-entered pass).
    fn with_rx_path<R>(&self, f: impl FnOnce(&mut RxPath<'a>) -> R) -> Option<R> {
        self.rx.lock(|path| match path.try_borrow_mut() {
            Ok(mut path) => Some(f(&mut path)),
            Err(_) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("{=str}: re-entered rx pass skipped", self.id.name());
                None
            }
        })
    }

    fn demux_pass(&self, path: &mut RxPath<'a>) -> DemuxReport {
        let RxPath { demux, producer } = path;
        let Some(producer) = producer.as_mut() else {
            return DemuxReport::default();
        };
        demux.process_dma(&self.dma, &self.cache, || self.port.dma_remaining(), producer)
    }
}

/// The consumer side of a running [`Channel`].
///
/// Exactly one exists per channel (returned by [`Channel::init`]). Move it
/// into the task that reads the serial stream.
pub struct SerialRx<'a, P, C, const DMA: usize, const RB: usize> {
    channel: &'a Channel<'a, P, C, DMA, RB>,
    consumer: Consumer<'a, u8>,
}

impl<'a, P, C, const DMA: usize, const RB: usize> SerialRx<'a, P, C, DMA, RB>
where
    P: SerialPort,
    C: CacheMaintenance,
{
    /// Read exactly `buffer.len()` bytes, waiting up to `timeout` for them.
    ///
    /// All or nothing: on [`SerialError::Timeout`] no byte is consumed and
    /// `buffer` is untouched. A zero `timeout` polls once. The wait is a spin
    /// on the tick counter, measured from call entry. A request larger than
    /// the ring capacity can never be met and times out.
    ///
    /// An empty buffer is rejected with [`SerialError::InvalidArgument`].
    pub fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<(), SerialError> {
        if buffer.is_empty() {
            return Err(SerialError::InvalidArgument);
        }

        let start = Instant::now();
        while !ring_buffer::read_exact(&mut self.consumer, buffer) {
            if timeout.as_ticks() == 0 || start.elapsed() > timeout {
                return Err(SerialError::Timeout);
            }
            core::hint::spin_loop();
        }
        Ok(())
    }

    /// Copy out whatever is queued, up to `buffer.len()` bytes. Never blocks;
    /// returns the number of bytes read (0 for an empty ring or buffer).
    pub fn read_buffered(&mut self, buffer: &mut [u8]) -> usize {
        ring_buffer::read(&mut self.consumer, buffer)
    }

    /// Drop every unread byte. DMA reception and the demultiplexer cursor are
    /// left alone, so bytes arriving afterwards are delivered normally.
    pub fn reset(&mut self) {
        let _discarded = ring_buffer::discard(&mut self.consumer);
        #[cfg(feature = "defmt")]
        defmt::debug!("{=str}: rx reset, {=usize} B discarded", self.channel.id.name(), _discarded);
    }

    /// Bytes ready to read.
    pub fn available(&self) -> usize {
        self.consumer.len()
    }

    /// Consume a pending idle wake-up, if any. Never blocks.
    pub fn take_idle(&mut self) -> bool {
        self.channel.idle.try_take().is_some()
    }

    /// Wait for the next idle-line event, giving up after `timeout`.
    pub async fn wait_idle(&mut self, timeout: Duration) -> Result<(), SerialError> {
        embassy_time::with_timeout(timeout, self.channel.idle.wait())
            .await
            .map_err(|_| SerialError::Timeout)
    }

    /// Blocking transmit on the same channel.
    pub fn transmit(&self, data: &[u8], timeout: Duration) -> Result<(), SerialError> {
        self.channel.transmit(data, timeout)
    }

    /// The channel this handle reads from.
    pub const fn channel(&self) -> &'a Channel<'a, P, C, DMA, RB> {
        self.channel
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::event::LineErrors;
    use crate::mocks::{MockCache, MockSerialPort};

    type TestChannel<'a> = Channel<'a, MockSerialPort, MockCache, 8, 9>;

    fn channel<'a>(id: ChannelId) -> TestChannel<'a> {
        Channel::new(id, MockSerialPort::new(id), MockCache::new())
    }

    #[test]
    fn init_arms_dma_and_masks_error_interrupt() {
        let ch = channel(ChannelId::Usart1);
        assert_eq!(ch.state(), ChannelState::Uninitialized);

        let _rx = ch.init().unwrap();

        assert_eq!(ch.state(), ChannelState::Running);
        assert_eq!(ch.port().arm_count(), 1);
        assert!(!ch.port().error_interrupt_enabled());
    }

    #[test]
    fn second_init_is_rejected() {
        let ch = channel(ChannelId::Usart1);
        let _rx = ch.init().unwrap();
        assert_eq!(ch.init().err(), Some(SerialError::AlreadyRunning));
        assert_eq!(ch.port().arm_count(), 1);
    }

    #[test]
    fn port_for_another_usart_is_rejected() {
        let ch: TestChannel<'_> =
            Channel::new(ChannelId::Usart1, MockSerialPort::new(ChannelId::Usart2), MockCache::new());
        assert_eq!(ch.init().err(), Some(SerialError::InvalidArgument));
        assert_eq!(ch.state(), ChannelState::Uninitialized);
    }

    #[test]
    fn failed_arm_leaves_channel_uninitialised() {
        let ch = channel(ChannelId::Usart2);
        ch.port().fail_next_arm(crate::PortError::Dma);
        assert_eq!(ch.init().err(), Some(SerialError::Hardware));
        assert_eq!(ch.state(), ChannelState::Uninitialized);
        assert!(ch.init().is_ok());
    }

    #[test]
    fn events_before_init_are_ignored() {
        let ch = channel(ChannelId::Usart1);
        assert!(ch.on_rx_event(RxEvent::Idle).is_noop());
        assert!(!ch.idle_signal().signaled());
        assert_eq!(ch.on_error(ChannelId::Usart1), RecoveryOutcome::NotRunning);
    }

    #[test]
    fn idle_event_copies_and_wakes() {
        let ch = channel(ChannelId::Usart1);
        let mut rx = ch.init().unwrap();
        ch.port().inject(b"abc");

        let report = ch.on_rx_event(RxEvent::Idle);

        assert_eq!(report.appended, 3);
        assert!(rx.take_idle());
        assert!(!rx.take_idle());
        let mut out = [0u8; 3];
        rx.receive(&mut out, Duration::from_ticks(0)).unwrap();
        assert_eq!(&out, b"abc");
    }

    #[test]
    fn transfer_events_copy_without_waking() {
        let ch = channel(ChannelId::Usart1);
        let rx = ch.init().unwrap();

        ch.port().inject(b"abcd");
        ch.on_rx_event(RxEvent::HalfTransfer);
        ch.port().inject(b"efgh");
        ch.on_rx_event(RxEvent::TransferComplete);

        assert_eq!(rx.available(), 8);
        assert!(!ch.idle_signal().signaled());
    }

    #[test]
    fn unknown_event_still_copies() {
        let ch = channel(ChannelId::Usart1);
        let rx = ch.init().unwrap();
        ch.port().inject(b"xy");

        assert_eq!(ch.on_rx_event(RxEvent::Other(9)).appended, 2);
        assert_eq!(rx.available(), 2);
        assert!(!ch.idle_signal().signaled());
    }

    #[test]
    fn repeated_idle_events_leave_one_pending_wake() {
        let ch = channel(ChannelId::Usart1);
        let mut rx = ch.init().unwrap();

        for _ in 0..5 {
            ch.on_rx_event(RxEvent::Idle);
        }

        assert!(rx.take_idle());
        assert!(!rx.take_idle());
    }

    #[test]
    fn every_pass_invalidates_the_whole_buffer() {
        let ch = channel(ChannelId::Usart1);
        let _rx = ch.init().unwrap();

        ch.on_rx_event(RxEvent::Idle);
        ch.on_rx_event(RxEvent::Idle);

        assert_eq!(ch.cache().invalidations(), 2);
        assert_eq!(ch.cache().last_len(), 8);
    }

    #[test]
    fn error_for_foreign_channel_is_a_noop() {
        let ch = channel(ChannelId::Usart1);
        let _rx = ch.init().unwrap();
        ch.port().raise_errors(LineErrors::OVERRUN);

        assert_eq!(
            ch.on_error(ChannelId::Usart3),
            RecoveryOutcome::ForeignChannel(ChannelId::Usart3)
        );
        assert_eq!(ch.port().pending_errors(), LineErrors::OVERRUN);
        assert_eq!(ch.port().arm_count(), 1);
    }

    #[test]
    fn recovery_keeps_buffered_bytes_and_realigns_cursor() {
        let ch = channel(ChannelId::Usart1);
        let mut rx = ch.init().unwrap();

        ch.port().inject(b"hello");
        ch.on_rx_event(RxEvent::Idle);
        ch.port().inject(b"!!");
        ch.port().raise_errors(LineErrors::OVERRUN | LineErrors::IDLE);

        let outcome = ch.on_error(ChannelId::Usart1);

        assert_eq!(
            outcome,
            RecoveryOutcome::Rearmed {
                cleared: LineErrors::OVERRUN | LineErrors::IDLE,
                drained: DemuxReport {
                    offset: 7,
                    runs: 1,
                    appended: 2,
                    dropped: 0,
                    clamped: false,
                },
            }
        );
        assert_eq!(ch.cursor(), 0);
        assert_eq!(ch.port().arm_count(), 2);

        let mut out = [0u8; 8];
        assert_eq!(rx.read_buffered(&mut out), 7);
        assert_eq!(&out[..7], b"hello!!");

        ch.port().inject(b"abc");
        ch.on_rx_event(RxEvent::Idle);
        assert_eq!(rx.read_buffered(&mut out), 3);
        assert_eq!(&out[..3], b"abc");
    }

    #[test]
    fn transmit_passes_through_and_maps_timeout() {
        let ch = channel(ChannelId::Usart2);
        assert_eq!(
            ch.transmit(&[], Duration::from_millis(5)),
            Err(SerialError::InvalidArgument)
        );
        ch.transmit(b"ping", Duration::from_millis(5)).unwrap();
        assert_eq!(ch.port().transmitted().as_slice(), b"ping");

        ch.port().stall_transmit(true);
        assert_eq!(
            ch.transmit(b"pong", Duration::from_millis(5)),
            Err(SerialError::Timeout)
        );
    }
}
