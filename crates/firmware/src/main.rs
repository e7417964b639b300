//! Serial board firmware - Main Entry Point
//!
//! Hardware-only entry point for STM32H743ZI. Brings up every enabled serial
//! channel and runs one echo task per channel: each idle-delimited frame that
//! arrives is written back on the same USART.

#![no_std]
#![no_main]

use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use panic_probe as _;

use dma_uart::{ChannelId, SerialError};
use firmware::board::{transmit_timeout, SerialWiring};
use firmware::serial::irq::{self, BoardRx};

/// Largest frame echoed in one go; longer frames are echoed in pieces.
const ECHO_CHUNK: usize = 64;

/// How long an echo task sleeps waiting for the next frame before logging a
/// heartbeat.
const IDLE_WAIT: Duration = Duration::from_secs(5);

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    defmt::info!("Serial board firmware v{=str}", env!("CARGO_PKG_VERSION"));

    let _p = embassy_stm32::init(firmware::boot::build_embassy_config());

    // Step 2: caches on before any DMA transfer is armed.
    match cortex_m::Peripherals::take() {
        Some(mut cp) => firmware::boot::hardware::enable_caches(&mut cp.SCB, &mut cp.CPUID),
        None => defmt::warn!("core peripherals already taken; D-cache state unchanged"),
    }

    // Step 3..6
    firmware::boot::hardware::enable_serial_clocks();
    let handles = irq::start(&spawner);

    for (rx, id) in handles.into_iter().zip(ChannelId::ALL) {
        let Some(rx) = rx else { continue };
        match spawner.spawn(echo_task(rx)) {
            Ok(()) => defmt::info!("{=str}: echo task running", id.name()),
            Err(_) => defmt::error!("{=str}: echo task spawn failed", id.name()),
        }
    }

    loop {
        Timer::after(Duration::from_secs(1)).await;
        for id in ChannelId::ALL {
            if let Some(ch) = irq::channel(id) {
                defmt::debug!(
                    "{=str}: {} buffered={=usize} cursor={=usize}",
                    id.name(),
                    ch.state(),
                    ch.buffered(),
                    ch.cursor()
                );
            }
        }
    }
}

#[embassy_executor::task(pool_size = 3)]
async fn echo_task(mut rx: BoardRx) {
    let id = rx.channel().id();
    let uart = SerialWiring::of(id).config().uart;
    let mut frame = [0u8; ECHO_CHUNK];

    loop {
        match rx.wait_idle(IDLE_WAIT).await {
            Ok(()) => {}
            Err(SerialError::Timeout) => {
                defmt::debug!("{=str}: line quiet", id.name());
                continue;
            }
            Err(err) => {
                defmt::warn!("{=str}: wait failed: {}", id.name(), err);
                continue;
            }
        }

        loop {
            let n = rx.read_buffered(&mut frame);
            let Some(bytes) = frame.get(..n).filter(|b| !b.is_empty()) else {
                break;
            };
            if let Err(err) = rx.transmit(bytes, transmit_timeout(&uart, n)) {
                defmt::warn!("{=str}: echo of {=usize} B failed: {}", id.name(), n, err);
            }
        }
    }
}
