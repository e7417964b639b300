//! Serial channel glue between the STM32H7 interrupt layer and the driver.
//!
//! The interrupt handlers only snapshot status registers; deciding what a
//! snapshot means and which channel hears about it happens here, on plain
//! data, so the dispatch rules are host-testable.
//!
//! # Notification sources
//!
//! | Source                 | Context         | Delivered as                          |
//! |------------------------|-----------------|---------------------------------------|
//! | USART IDLE flag        | USARTn IRQ      | [`RxEvent::Idle`]                     |
//! | USART ORE/FE/NE/PE     | USARTn IRQ      | error notification                    |
//! | DMA HTIF / TCIF        | DMA watch task  | `HalfTransfer` / `TransferComplete`   |
//! | DMA TEIF               | DMA watch task  | error notification                    |
//!
//! The DMA1 stream interrupt vectors belong to embassy-stm32's DMA driver, so
//! half/full transfer flags are sampled by a task at
//! [`board::dma_poll_interval`](crate::board::dma_poll_interval) instead of
//! through their own IRQ.

#[cfg(feature = "hardware")]
pub mod irq;
#[cfg(feature = "hardware")]
pub mod stm32h7;

use dma_uart::{ChannelId, LineErrors, RecoveryOutcome, Router, RxEvent};

/// What a USART interrupt must do for one status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsartIrq {
    /// A line error is latched: run error recovery (clears IDLE too).
    Error,
    /// Idle line after traffic: clear IDLE and deliver the event.
    Idle,
    /// Nothing the receive path cares about.
    Spurious,
}

/// Classify a USART status snapshot. Line errors win over idle: recovery
/// drains the buffer anyway, and an idle event on a broken stream would
/// wake the consumer for bytes that may never be collected.
pub const fn classify_usart(status: LineErrors) -> UsartIrq {
    if status.has_line_error() {
        UsartIrq::Error
    } else if status.contains(LineErrors::IDLE) {
        UsartIrq::Idle
    } else {
        UsartIrq::Spurious
    }
}

/// Transfer flags of one DMA stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamFlags {
    /// HTIF: half transfer
    pub half: bool,
    /// TCIF: transfer complete (the stream wrapped)
    pub complete: bool,
    /// TEIF: transfer error
    pub error: bool,
}

impl StreamFlags {
    /// `true` when no flag is set.
    pub const fn is_empty(&self) -> bool {
        !self.half && !self.complete && !self.error
    }

    /// Receive events to deliver, half transfer first.
    pub fn events(&self) -> impl Iterator<Item = RxEvent> {
        let half = self.half.then_some(RxEvent::HalfTransfer);
        let complete = self.complete.then_some(RxEvent::TransferComplete);
        half.into_iter().chain(complete)
    }
}

/// Deliver one USART interrupt snapshot for `id`. Returns what was done.
pub fn dispatch_usart<const N: usize>(router: &Router<'_, N>, id: ChannelId, status: LineErrors) -> UsartIrq {
    let action = classify_usart(status);
    match action {
        UsartIrq::Error => {
            report_recovery(id, router.route_error(id));
        }
        UsartIrq::Idle => {
            let _ = router.route_rx(id, RxEvent::Idle);
        }
        UsartIrq::Spurious => {
            #[cfg(feature = "defmt")]
            defmt::debug!("{=str}: spurious irq, status {=u8:#x}", id.name(), status.bits());
        }
    }
    action
}

/// Deliver the DMA stream flags sampled for `id`. A transfer error is routed
/// as an error notification after the pending events, so bytes already
/// written are still collected by the recovery drain.
pub fn dispatch_stream<const N: usize>(router: &Router<'_, N>, id: ChannelId, flags: StreamFlags) -> usize {
    let mut delivered = 0usize;
    for event in flags.events() {
        if router.route_rx(id, event).is_some() {
            delivered = delivered.saturating_add(1);
        }
    }
    if flags.error {
        report_recovery(id, router.route_error(id));
    }
    delivered
}

fn report_recovery(_id: ChannelId, outcome: Option<RecoveryOutcome>) {
    let Some(outcome) = outcome else { return };
    if !outcome.is_rearmed() {
        #[cfg(feature = "defmt")]
        defmt::warn!("{=str}: recovery did not re-arm: {}", _id.name(), outcome);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use dma_uart::mocks::{MockCache, MockSerialPort};
    use dma_uart::Channel;

    type TestChannel<'a> = Channel<'a, MockSerialPort, MockCache, 16, 33>;

    fn channel<'a>(id: ChannelId) -> TestChannel<'a> {
        Channel::new(id, MockSerialPort::new(id), MockCache::new())
    }

    #[test]
    fn errors_take_precedence_over_idle() {
        assert_eq!(classify_usart(LineErrors::IDLE | LineErrors::OVERRUN), UsartIrq::Error);
        assert_eq!(classify_usart(LineErrors::IDLE), UsartIrq::Idle);
        assert_eq!(classify_usart(LineErrors::CHAR_MATCH), UsartIrq::Spurious);
        assert_eq!(classify_usart(LineErrors::empty()), UsartIrq::Spurious);
    }

    #[test]
    fn stream_events_come_half_first() {
        let flags = StreamFlags {
            half: true,
            complete: true,
            error: false,
        };
        let events: Vec<_> = flags.events().collect();
        assert_eq!(events, [RxEvent::HalfTransfer, RxEvent::TransferComplete]);
        assert_eq!(StreamFlags::default().events().count(), 0);
        assert!(StreamFlags::default().is_empty());
    }

    #[test]
    fn idle_irq_reaches_the_right_channel() {
        let a = channel(ChannelId::Usart1);
        let b = channel(ChannelId::Usart3);
        let mut rx_a = a.init().unwrap();
        let mut rx_b = b.init().unwrap();
        let mut router = Router::<'_, 3>::new();
        router.register(&a).unwrap();
        router.register(&b).unwrap();

        b.port().inject(b"vcp");
        let action = dispatch_usart(&router, ChannelId::Usart3, LineErrors::IDLE);

        assert_eq!(action, UsartIrq::Idle);
        assert!(rx_b.take_idle());
        assert!(!rx_a.take_idle());
        assert_eq!(rx_b.available(), 3);
    }

    #[test]
    fn error_irq_rearms_the_stream() {
        let a = channel(ChannelId::Usart2);
        let _rx = a.init().unwrap();
        let mut router = Router::<'_, 3>::new();
        router.register(&a).unwrap();
        a.port().raise_errors(LineErrors::FRAMING | LineErrors::IDLE);

        let action = dispatch_usart(&router, ChannelId::Usart2, a.port().pending_errors());

        assert_eq!(action, UsartIrq::Error);
        assert_eq!(a.port().arm_count(), 2);
        assert!(a.port().pending_errors().is_empty());
    }

    #[test]
    fn stream_flags_copy_without_waking() {
        let a = channel(ChannelId::Usart1);
        let mut rx = a.init().unwrap();
        let mut router = Router::<'_, 3>::new();
        router.register(&a).unwrap();

        a.port().inject(&[7; 8]);
        let delivered = dispatch_stream(
            &router,
            ChannelId::Usart1,
            StreamFlags {
                half: true,
                ..StreamFlags::default()
            },
        );

        assert_eq!(delivered, 1);
        assert_eq!(rx.available(), 8);
        assert!(!rx.take_idle());
    }

    #[test]
    fn stream_error_drains_before_rearming() {
        let a = channel(ChannelId::Usart1);
        let mut rx = a.init().unwrap();
        let mut router = Router::<'_, 3>::new();
        router.register(&a).unwrap();

        a.port().inject(b"abc");
        dispatch_stream(
            &router,
            ChannelId::Usart1,
            StreamFlags {
                error: true,
                ..StreamFlags::default()
            },
        );

        assert_eq!(a.port().arm_count(), 2);
        let mut buf = [0u8; 3];
        assert_eq!(rx.read_buffered(&mut buf), 3);
        assert_eq!(&buf, b"abc");
    }

    #[test]
    fn unregistered_channel_is_ignored() {
        let router = Router::<'_, 3>::new();
        assert_eq!(dispatch_usart(&router, ChannelId::Usart1, LineErrors::IDLE), UsartIrq::Idle);
        assert_eq!(
            dispatch_stream(
                &router,
                ChannelId::Usart1,
                StreamFlags {
                    half: true,
                    complete: true,
                    error: true,
                },
            ),
            0
        );
    }
}
