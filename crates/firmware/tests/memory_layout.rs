//! Memory layout architecture tests.
// Architecture test file: unwrap and indexing lints are intentional.
#![allow(clippy::unwrap_used, clippy::indexing_slicing)]
//! The linker script and the driver's buffer types together decide whether
//! the DMA engine can reach the receive buffers and whether cache
//! invalidation stays inside them. Checked at declaration level here.

use dma_uart::config::{DCACHE_LINE_BYTES, RX_DMA_BUF_LEN};
use dma_uart::DmaRxBuffer;

const MEMORY_X: &str = include_str!("../../../memory.x");

fn region_origin(name: &str) -> Option<&'static str> {
    MEMORY_X
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with(name) && line.contains("ORIGIN"))
        .and_then(|line| line.split("ORIGIN =").nth(1))
        .and_then(|rest| rest.split(',').next())
        .map(str::trim)
}

/// DMA1 cannot reach DTCM on the H743: RAM (where .bss and every channel
/// static land) must be AXI SRAM.
#[test]
fn ram_region_is_axi_sram() {
    assert_eq!(region_origin("RAM"), Some("0x24000000"));
    assert_ne!(region_origin("RAM"), region_origin("DTCM"));
}

#[test]
fn flash_region_starts_at_bank1() {
    assert_eq!(region_origin("FLASH"), Some("0x08000000"));
}

/// Invalidating a receive buffer must never discard a neighbour's dirty line.
#[test]
fn receive_buffer_covers_whole_cache_lines() {
    assert_eq!(core::mem::align_of::<DmaRxBuffer<RX_DMA_BUF_LEN>>(), DCACHE_LINE_BYTES);
    assert_eq!(core::mem::size_of::<DmaRxBuffer<RX_DMA_BUF_LEN>>() % DCACHE_LINE_BYTES, 0);
}

/// The firmware must enable the D-cache before arming any channel.
#[test]
fn main_enables_caches_before_starting_channels() {
    let main_rs = include_str!("../src/main.rs");
    let caches = main_rs.find("enable_caches").unwrap();
    let start = main_rs.find("irq::start").unwrap();
    assert!(caches < start, "enable_caches must run before irq::start");
}

/// Interrupts are unmasked only after the channel is initialised and routed.
#[test]
fn usart_irq_is_enabled_after_registration() {
    let irq_rs = include_str!("../src/serial/irq.rs");
    let init = irq_rs.find("ch.init()").unwrap();
    let register = irq_rs.find("router.register(ch)").unwrap();
    let enable = irq_rs.find("irq.enable()").unwrap();
    assert!(init < register && register < enable);
}
