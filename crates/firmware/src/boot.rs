//! Hardware boot sequence for the serial board.
//!
//! Initialization order (MUST be respected):
//!   1. Clocks: HSI → PLL1, 400 MHz system clock, every APB bus at 100 MHz
//!   2. Caches: enable I-cache and D-cache
//!   3. Peripheral clocks: DMA1 and each enabled USART
//!   4. GPIO: USART pins to alternate function 7
//!   5. Channels: `init()` arms circular DMA reception per channel
//!   6. Interrupts: unmask the USART IRQs, spawn the DMA watch task
//!
//! The D-cache is enabled before any channel arms DMA, so every receive pass
//! invalidates the receive buffer before reading it.

/// Ordered list of boot sequence steps for documentation and testing.
pub const BOOT_SEQUENCE_STEPS: &[&str] = &[
    "1. RCC: PLL1 400 MHz sysclk, APB1..4 at 100 MHz (USART kernel clock)",
    "2. Caches: enable I-cache + D-cache before any DMA transfer is armed",
    "3. RCC: enable DMA1 + USART peripheral clocks",
    "4. GPIO: USART TX/RX pins to AF7",
    "5. Channels: init() arms circular RX DMA",
    "6. NVIC: unmask USART IRQs, spawn DMA watch task",
];

/// Position of the first step whose text contains `needle`.
pub fn step_index(needle: &str) -> Option<usize> {
    BOOT_SEQUENCE_STEPS.iter().position(|s| s.contains(needle))
}

/// Embassy HAL configuration: clocks for the USART kernel at 100 MHz.
///
/// Must match [`board::USART_KERNEL_HZ`](crate::board::USART_KERNEL_HZ).
#[cfg(feature = "hardware")]
pub fn build_embassy_config() -> embassy_stm32::Config {
    use embassy_stm32::rcc::*;

    let mut config = embassy_stm32::Config::default();

    // HSI: 64 MHz internal oscillator (no prescaler)
    config.rcc.hsi = Some(HSIPrescaler::DIV1);
    config.rcc.csi = true;

    // HSI (64 MHz) / prediv(4) = 16 MHz → × mul(50) = 800 MHz VCO
    // PLL1_P = VCO / divp(2) = 400 MHz  → system clock
    config.rcc.pll1 = Some(Pll {
        source: PllSource::HSI,
        prediv: PllPreDiv::DIV4,
        mul: PllMul::MUL50,
        divp: Some(PllDiv::DIV2),
        divq: None,
        divr: None,
    });

    config.rcc.sys = Sysclk::PLL1_P; // 400 MHz
    config.rcc.ahb_pre = AHBPrescaler::DIV2; // 200 MHz
    config.rcc.apb1_pre = APBPrescaler::DIV2; // 100 MHz (USART2, USART3)
    config.rcc.apb2_pre = APBPrescaler::DIV2; // 100 MHz (USART1)
    config.rcc.apb3_pre = APBPrescaler::DIV2; // 100 MHz
    config.rcc.apb4_pre = APBPrescaler::DIV2; // 100 MHz
    config.rcc.voltage_scale = VoltageScale::Scale1;

    config
}

/// Hardware-only boot steps.
#[cfg(feature = "hardware")]
pub mod hardware {
    use embassy_stm32::pac;

    /// Enable the Cortex-M7 instruction and data caches.
    ///
    /// Must run before any channel is initialised (step 2).
    pub fn enable_caches(scb: &mut cortex_m::peripheral::SCB, cpuid: &mut cortex_m::peripheral::CPUID) {
        scb.enable_icache();
        scb.enable_dcache(cpuid);
        defmt::info!("I-cache + D-cache enabled");
    }

    /// Enable the DMA1 and USART peripheral clocks (step 3).
    pub fn enable_serial_clocks() {
        pac::RCC.ahb1enr().modify(|w| w.set_dma1en(true));
        pac::RCC.apb2enr().modify(|w| w.set_usart1en(true));
        pac::RCC.apb1lenr().modify(|w| {
            w.set_usart2en(true);
            w.set_usart3en(true);
        });
        // Read back so the enables have landed before the first register access.
        let _ = pac::RCC.apb1lenr().read();
    }
}
