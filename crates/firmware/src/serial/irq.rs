//! Board channel instances, interrupt entry points and the DMA watch task.
//!
//! One `static` [`BoardChannel`] per enabled USART, registered in [`ROUTER`]
//! by [`start`]. The USART vectors and the watch task look the channel up by
//! [`ChannelId`] and hand the notification to it.

use core::cell::RefCell;

use dma_uart::config::{CHANNEL_TABLE, RX_DMA_BUF_LEN, RX_RING_LEN};
use dma_uart::{Channel, ChannelId, LineErrors, Router, SerialRx};
use embassy_executor::Spawner;
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::{InterruptExt, Priority};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::Ticker;

use crate::board::{dma_poll_interval, SerialWiring};
use crate::serial::stm32h7::{CortexM7DCache, Stm32SerialPort};
use crate::serial::{dispatch_stream, dispatch_usart};

/// Channel type for every board USART.
pub type BoardChannel = Channel<'static, Stm32SerialPort, CortexM7DCache, RX_DMA_BUF_LEN, RX_RING_LEN>;

// The H7 D-cache is not coherent with DMA: every table entry must say so.
#[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]
const _: () = {
    let mut i = 0;
    while i < CHANNEL_TABLE.len() {
        assert!(CHANNEL_TABLE[i].uses_cache::<CortexM7DCache>());
        i += 1;
    }
};

/// Consumer handle of a board channel.
pub type BoardRx = SerialRx<'static, Stm32SerialPort, CortexM7DCache, RX_DMA_BUF_LEN, RX_RING_LEN>;

/// USART IRQ priority: above thread mode, below the time driver.
const USART_IRQ_PRIORITY: Priority = Priority::P6;

#[cfg(feature = "usart1")]
/// USART1, the master serial port.
pub static USART1_CHANNEL: BoardChannel =
    Channel::new(ChannelId::Usart1, Stm32SerialPort::new(ChannelId::Usart1), CortexM7DCache);

#[cfg(feature = "usart2")]
/// USART2.
pub static USART2_CHANNEL: BoardChannel =
    Channel::new(ChannelId::Usart2, Stm32SerialPort::new(ChannelId::Usart2), CortexM7DCache);

#[cfg(feature = "usart3")]
/// USART3, wired to the ST-LINK virtual COM port.
pub static USART3_CHANNEL: BoardChannel =
    Channel::new(ChannelId::Usart3, Stm32SerialPort::new(ChannelId::Usart3), CortexM7DCache);

/// Notification routing table, filled once by [`start`].
pub static ROUTER: Mutex<CriticalSectionRawMutex, RefCell<Router<'static, 3>>> =
    Mutex::new(RefCell::new(Router::new()));

/// The static channel for `id`, if compiled in.
pub fn channel(id: ChannelId) -> Option<&'static BoardChannel> {
    match id {
        #[cfg(feature = "usart1")]
        ChannelId::Usart1 => Some(&USART1_CHANNEL),
        #[cfg(feature = "usart2")]
        ChannelId::Usart2 => Some(&USART2_CHANNEL),
        #[cfg(feature = "usart3")]
        ChannelId::Usart3 => Some(&USART3_CHANNEL),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

/// Consumer handles returned by [`start`], indexed by [`ChannelId::index`].
pub type BoardHandles = [Option<BoardRx>; 3];

/// Bring up every enabled channel: program the USART, arm reception,
/// register it for notifications, then unmask its interrupt. Finally spawn
/// the DMA watch task.
///
/// A channel that fails to come up is logged and left out; the others still
/// start.
pub fn start(spawner: &Spawner) -> BoardHandles {
    let mut handles: BoardHandles = [None, None, None];

    for id in crate::board::enabled_channels() {
        let Some(ch) = channel(id) else { continue };
        let cfg = SerialWiring::of(id).config();

        if let Err(err) = ch.port().configure(&cfg.uart) {
            defmt::error!("{=str}: line setup failed: {}", id.name(), err);
            continue;
        }
        let rx = match ch.init() {
            Ok(rx) => rx,
            Err(err) => {
                defmt::error!("{=str}: init failed: {}", id.name(), err);
                continue;
            }
        };
        let registered = ROUTER.lock(|router| Router::register_shared(router, ch));
        if let Err(err) = registered {
            defmt::error!("{=str}: not routed: {}", id.name(), err);
            continue;
        }

        let irq = usart_interrupt(id);
        irq.set_priority(USART_IRQ_PRIORITY);
        // SAFETY: the handler only touches statics initialised above.
        unsafe { irq.enable() };

        if let Some(slot) = handles.get_mut(id.index()) {
            *slot = Some(rx);
        }
    }

    if let Err(_err) = spawner.spawn(dma_watch_task()) {
        defmt::error!("DMA watch task spawn failed");
    }
    handles
}

const fn usart_interrupt(id: ChannelId) -> interrupt::Interrupt {
    match id {
        ChannelId::Usart1 => interrupt::USART1,
        ChannelId::Usart2 => interrupt::USART2,
        ChannelId::Usart3 => interrupt::USART3,
    }
}

fn on_usart_irq(id: ChannelId) {
    let Some(ch) = channel(id) else { return };
    let status = ch.port().status();
    if status.contains(LineErrors::IDLE) && !status.has_line_error() {
        ch.port().clear_idle();
    }
    ROUTER.lock(|router| {
        if let Ok(router) = router.try_borrow() {
            dispatch_usart(&router, id, status);
        }
    });
}

#[cfg(feature = "usart1")]
#[interrupt]
fn USART1() {
    on_usart_irq(ChannelId::Usart1);
}

#[cfg(feature = "usart2")]
#[interrupt]
fn USART2() {
    on_usart_irq(ChannelId::Usart2);
}

#[cfg(feature = "usart3")]
#[interrupt]
fn USART3() {
    on_usart_irq(ChannelId::Usart3);
}

/// Samples half/full transfer flags of every running channel.
///
/// The period is derived from the fastest-filling channel's line settings so
/// each half buffer is collected before the engine wraps onto it.
#[embassy_executor::task]
async fn dma_watch_task() {
    let period = crate::board::enabled_channels()
        .iter()
        .map(|&id| {
            let cfg = SerialWiring::of(id).config();
            dma_poll_interval(&cfg.uart, cfg.dma_len)
        })
        .min()
        .unwrap_or(embassy_time::Duration::from_millis(1));
    defmt::info!("DMA watch task: period {=u64} us", period.as_micros());

    let mut ticker = Ticker::every(period);
    loop {
        ticker.next().await;
        for id in crate::board::enabled_channels() {
            let Some(ch) = channel(id) else { continue };
            if !ch.is_running() {
                continue;
            }
            let flags = ch.port().take_stream_flags();
            if flags.is_empty() {
                continue;
            }
            ROUTER.lock(|router| {
                if let Ok(router) = router.try_borrow() {
                    dispatch_stream(&router, id, flags);
                }
            });
        }
    }
}
