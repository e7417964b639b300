//! Cortex-M exception handlers.
//!
//! A fault inside a USART interrupt or the DMA watch task ends up here. The
//! handler reports the stacked frame over RTT and halts, so a debugger can
//! inspect PC/LR instead of the core silently resetting.

/// HardFault exception handler (hardware target only).
///
/// # Safety
///
/// Never returns: returning from a HardFault handler is undefined behavior on
/// Cortex-M.
#[cfg(feature = "hardware")]
#[cortex_m_rt::exception]
#[allow(unsafe_code)]
unsafe fn HardFault(ef: &cortex_m_rt::ExceptionFrame) -> ! {
    defmt::panic!(
        "HardFault: pc=0x{=u32:08x} lr=0x{=u32:08x} xpsr=0x{=u32:08x}",
        ef.pc(),
        ef.lr(),
        ef.xpsr()
    );
}
