//! Per-channel notification routing
//!
//! The interrupt layer only knows which USART raised a notification. The
//! [`Router`] maps that [`ChannelId`] to the channel registered for it, so one
//! set of interrupt handlers serves every enabled channel.

use core::cell::RefCell;

use crate::channel::Channel;
use crate::config::ChannelId;
use crate::demux::DemuxReport;
use crate::event::RxEvent;
use crate::port::{CacheMaintenance, SerialPort};
use crate::recovery::RecoveryOutcome;

/// Receiver of hardware notifications for one channel.
pub trait NotificationHandler {
    /// The USART this handler serves.
    fn channel_id(&self) -> ChannelId;

    /// Receive event (idle line, half transfer, transfer complete).
    fn on_rx_event(&self, event: RxEvent) -> DemuxReport;

    /// Error notification raised for `source`.
    fn on_error(&self, source: ChannelId) -> RecoveryOutcome;
}

impl<P, C, const DMA: usize, const RB: usize> NotificationHandler for Channel<'_, P, C, DMA, RB>
where
    P: SerialPort,
    C: CacheMaintenance,
{
    fn channel_id(&self) -> ChannelId {
        self.id()
    }

    fn on_rx_event(&self, event: RxEvent) -> DemuxReport {
        Channel::on_rx_event(self, event)
    }

    fn on_error(&self, source: ChannelId) -> RecoveryOutcome {
        Channel::on_error(self, source)
    }
}

/// Registration failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RouteError {
    /// Every slot is taken
    Full,
    /// A handler for this channel is already registered
    Duplicate(ChannelId),
    /// The table is borrowed elsewhere (a dispatch is in progress)
    Busy,
}

impl core::fmt::Display for RouteError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Full => f.write_str("routing table full"),
            Self::Duplicate(id) => write!(f, "{} already registered", id.name()),
            Self::Busy => f.write_str("routing table busy"),
        }
    }
}

/// Dispatch table from [`ChannelId`] to its registered handler.
pub struct Router<'a, const N: usize> {
    handlers: heapless::Vec<&'a (dyn NotificationHandler + Sync), N>,
}

impl<const N: usize> Default for Router<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const N: usize> Router<'a, N> {
    /// Empty table.
    pub const fn new() -> Self {
        Self {
            handlers: heapless::Vec::new(),
        }
    }

    /// Add the handler for `handler.channel_id()`.
    pub fn register(&mut self, handler: &'a (dyn NotificationHandler + Sync)) -> Result<(), RouteError> {
        let id = handler.channel_id();
        if self.handler(id).is_some() {
            return Err(RouteError::Duplicate(id));
        }
        self.handlers.push(handler).map_err(|_| RouteError::Full)
    }

    /// [`register`](Self::register) on a table shared behind a `RefCell`, as
    /// the board keeps it. Fails with [`RouteError::Busy`] instead of
    /// panicking when the table is already borrowed.
    pub fn register_shared(
        table: &RefCell<Self>,
        handler: &'a (dyn NotificationHandler + Sync),
    ) -> Result<(), RouteError> {
        table
            .try_borrow_mut()
            .map_err(|_| RouteError::Busy)?
            .register(handler)
    }

    /// The handler registered for `id`, if any.
    pub fn handler(&self, id: ChannelId) -> Option<&'a (dyn NotificationHandler + Sync)> {
        self.handlers.iter().copied().find(|h| h.channel_id() == id)
    }

    /// Deliver a receive event. `None` when no channel is registered for `id`.
    pub fn route_rx(&self, id: ChannelId, event: RxEvent) -> Option<DemuxReport> {
        let Some(handler) = self.handler(id) else {
            #[cfg(feature = "defmt")]
            defmt::warn!("rx event for unregistered {=str}", id.name());
            return None;
        };
        Some(handler.on_rx_event(event))
    }

    /// Deliver an error notification raised by `id`'s USART.
    pub fn route_error(&self, id: ChannelId) -> Option<RecoveryOutcome> {
        let Some(handler) = self.handler(id) else {
            #[cfg(feature = "defmt")]
            defmt::warn!("error notification for unregistered {=str}", id.name());
            return None;
        };
        Some(handler.on_error(id))
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::LineErrors;
    use crate::mocks::{MockCache, MockSerialPort};

    type TestChannel<'a> = Channel<'a, MockSerialPort, MockCache, 8, 17>;

    fn channel<'a>(id: ChannelId) -> TestChannel<'a> {
        Channel::new(id, MockSerialPort::new(id), MockCache::new())
    }

    #[test]
    fn routes_by_channel_id() {
        let a = channel(ChannelId::Usart1);
        let b = channel(ChannelId::Usart3);
        let rx_a = a.init().unwrap();
        let rx_b = b.init().unwrap();

        let mut router = Router::<'_, 3>::new();
        router.register(&a).unwrap();
        router.register(&b).unwrap();

        b.port().inject(b"xyz");
        let report = router.route_rx(ChannelId::Usart3, RxEvent::Idle).unwrap();

        assert_eq!(report.appended, 3);
        assert_eq!(rx_b.available(), 3);
        assert_eq!(rx_a.available(), 0);
        assert!(!a.idle_signal().signaled());
    }

    #[test]
    fn unknown_channel_is_a_noop() {
        let a = channel(ChannelId::Usart1);
        let _rx = a.init().unwrap();
        let mut router = Router::<'_, 3>::new();
        router.register(&a).unwrap();

        assert_eq!(router.route_rx(ChannelId::Usart2, RxEvent::Idle), None);
        assert_eq!(router.route_error(ChannelId::Usart2), None);
        assert_eq!(a.port().arm_count(), 1);
    }

    #[test]
    fn error_reaches_only_the_raising_channel() {
        let a = channel(ChannelId::Usart1);
        let b = channel(ChannelId::Usart2);
        let _rx_a = a.init().unwrap();
        let _rx_b = b.init().unwrap();
        let mut router = Router::<'_, 3>::new();
        router.register(&a).unwrap();
        router.register(&b).unwrap();
        a.port().raise_errors(LineErrors::FRAMING);

        let outcome = router.route_error(ChannelId::Usart1).unwrap();

        assert!(outcome.is_rearmed());
        assert_eq!(a.port().arm_count(), 2);
        assert_eq!(b.port().arm_count(), 1);
    }

    #[test]
    fn duplicate_and_overflowing_registrations_fail() {
        let a = channel(ChannelId::Usart1);
        let again = channel(ChannelId::Usart1);
        let b = channel(ChannelId::Usart2);
        let mut router = Router::<'_, 1>::new();

        router.register(&a).unwrap();
        assert_eq!(
            router.register(&again),
            Err(RouteError::Duplicate(ChannelId::Usart1))
        );
        assert_eq!(router.register(&b), Err(RouteError::Full));
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn shared_table_reports_busy_while_borrowed() {
        let a = channel(ChannelId::Usart1);
        let table = RefCell::new(Router::<'_, 2>::new());

        let dispatching = table.borrow();
        assert_eq!(Router::register_shared(&table, &a), Err(RouteError::Busy));
        drop(dispatching);

        Router::register_shared(&table, &a).unwrap();
        assert_eq!(table.borrow().len(), 1);
    }
}
