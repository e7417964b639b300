//! Register-level USART + DMA1 + DMAMUX1 port and Cortex-M7 D-cache maintenance.
//!
//! # Receive stream setup
//!
//! Each channel uses one DMA1 stream in circular, peripheral-to-memory mode,
//! byte-wide on both sides, memory increment on. The DMAMUX1 channel with the
//! same number as the stream selects the USART's RX request line. Stream
//! interrupt enables (HTIE/TCIE/TEIE) stay off: the flags still latch and are
//! sampled by the DMA watch task.
//!
//! # Error interrupt
//!
//! `CR3.EIE` is cleared after arming, so framing/noise/overrun errors do not
//! raise the USART interrupt on their own. They are seen whenever the IDLE or
//! parity interrupt fires, and cleared by the recovery path.

use dma_uart::{CacheMaintenance, ChannelId, LineErrors, Parity, PortError, SerialPort, StopBits, UartConfig};
use embassy_stm32::pac;
use embassy_stm32::pac::dma::vals as dma_vals;
use embassy_stm32::pac::usart::vals as usart_vals;
use embassy_time::{Duration, Instant};

use crate::board::{brr, AfPin, GpioPort, SerialWiring, USART_KERNEL_HZ};
use crate::serial::StreamFlags;

/// Upper bound on polls of `CR.EN` while a stream winds down.
const STREAM_DISABLE_SPINS: u32 = 10_000;

/// One STM32H7 USART with its circular RX DMA1 stream.
pub struct Stm32SerialPort {
    wiring: SerialWiring,
}

impl Stm32SerialPort {
    /// Port for `id`, wired per [`SerialWiring::of`].
    pub const fn new(id: ChannelId) -> Self {
        Self {
            wiring: SerialWiring::of(id),
        }
    }

    /// Board wiring of this port.
    pub const fn wiring(&self) -> &SerialWiring {
        &self.wiring
    }

    fn usart(&self) -> pac::usart::Usart {
        match self.wiring.id {
            ChannelId::Usart1 => pac::USART1,
            ChannelId::Usart2 => pac::USART2,
            ChannelId::Usart3 => pac::USART3,
        }
    }

    fn stream(&self) -> pac::dma::St {
        pac::DMA1.st(usize::from(self.wiring.dma_stream))
    }

    fn flag_reg(&self) -> (usize, usize) {
        let stream = usize::from(self.wiring.dma_stream);
        (stream / 4, stream % 4)
    }

    /// Route the TX/RX pins and program line settings. Leaves the receiver
    /// off; reception starts with [`SerialPort::start_circular_rx`].
    pub fn configure(&self, uart: &UartConfig) -> Result<(), PortError> {
        let div = brr(USART_KERNEL_HZ, uart.baud_rate).ok_or(PortError::Busy)?;
        configure_pin(self.wiring.tx);
        configure_pin(self.wiring.rx);

        let usart = self.usart();
        usart.cr1().modify(|w| w.set_ue(false));
        usart.brr().write(|w| w.set_brr(div));
        usart.cr2().modify(|w| {
            w.set_stop(match uart.stop_bits {
                StopBits::One => usart_vals::Stop::STOP1,
                StopBits::OnePointFive => usart_vals::Stop::STOP1P5,
                StopBits::Two => usart_vals::Stop::STOP2,
            });
        });
        // M1:M0 = 10 → 7 bits, 00 → 8 bits, 01 → 9 bits (parity bit included)
        let (m1, m0) = match uart.word_length() {
            7 => (usart_vals::M1::BIT7, usart_vals::M0::BIT8),
            9 => (usart_vals::M1::M0, usart_vals::M0::BIT9),
            _ => (usart_vals::M1::M0, usart_vals::M0::BIT8),
        };
        usart.cr1().modify(|w| {
            w.set_pce(uart.parity != Parity::None);
            w.set_ps(if uart.parity == Parity::Odd {
                usart_vals::Ps::ODD
            } else {
                usart_vals::Ps::EVEN
            });
            w.set_m1(m1);
            w.set_m0(m0);
            w.set_te(true);
            w.set_ue(true);
        });
        defmt::info!(
            "{=str}: {=u32} baud, brr {=u16}",
            self.wiring.id.name(),
            uart.baud_rate,
            div
        );
        Ok(())
    }

    /// Raw USART status as a flag set, without clearing anything.
    pub fn status(&self) -> LineErrors {
        let isr = self.usart().isr().read();
        let mut flags = LineErrors::empty();
        if isr.ore() {
            flags |= LineErrors::OVERRUN;
        }
        if isr.fe() {
            flags |= LineErrors::FRAMING;
        }
        if isr.pe() {
            flags |= LineErrors::PARITY;
        }
        if isr.ne() {
            flags |= LineErrors::NOISE;
        }
        if isr.idle() {
            flags |= LineErrors::IDLE;
        }
        if isr.cmf() {
            flags |= LineErrors::CHAR_MATCH;
        }
        flags
    }

    /// Acknowledge the idle-line flag.
    pub fn clear_idle(&self) {
        self.usart().icr().write(|w| w.set_idle(true));
    }

    /// Read and clear the stream's transfer flags.
    pub fn take_stream_flags(&self) -> StreamFlags {
        let (reg, bit) = self.flag_reg();
        let isr = pac::DMA1.isr(reg).read();
        let flags = StreamFlags {
            half: isr.htif(bit),
            complete: isr.tcif(bit),
            error: isr.teif(bit),
        };
        if !flags.is_empty() {
            pac::DMA1.ifcr(reg).write(|w| {
                w.set_htif(bit, flags.half);
                w.set_tcif(bit, flags.complete);
                w.set_teif(bit, flags.error);
            });
        }
        flags
    }

    fn disable_stream(&self) -> Result<(), PortError> {
        let st = self.stream();
        st.cr().modify(|w| w.set_en(false));
        let mut spins = 0u32;
        while st.cr().read().en() {
            spins = spins.saturating_add(1);
            if spins > STREAM_DISABLE_SPINS {
                return Err(PortError::Dma);
            }
        }
        let (reg, bit) = self.flag_reg();
        pac::DMA1.ifcr(reg).write(|w| {
            w.set_htif(bit, true);
            w.set_tcif(bit, true);
            w.set_teif(bit, true);
            w.set_dmeif(bit, true);
            w.set_feif(bit, true);
        });
        Ok(())
    }
}

impl SerialPort for Stm32SerialPort {
    fn id(&self) -> ChannelId {
        self.wiring.id
    }

    unsafe fn start_circular_rx(&self, buffer: *mut u8, len: usize) -> Result<(), PortError> {
        let ndt = u16::try_from(len).map_err(|_| PortError::Dma)?;
        let usart = self.usart();

        usart.cr3().modify(|w| w.set_dmar(false));
        self.disable_stream()?;

        let st = self.stream();
        #[allow(clippy::cast_possible_truncation)] // 32-bit address space
        {
            st.par().write_value(usart.rdr().as_ptr() as u32);
            st.m0ar().write_value(buffer as u32);
        }
        st.ndtr().write(|w| w.set_ndt(ndt));
        pac::DMAMUX1
            .ccr(usize::from(self.wiring.dma_stream))
            .write(|w| w.set_dmareq_id(self.wiring.dmamux_request));
        st.fcr().write(|w| w.set_dmdis(dma_vals::Dmdis::ENABLED));
        st.cr().write(|w| {
            w.set_dir(dma_vals::Dir::PERIPHERALTOMEMORY);
            w.set_circ(true);
            w.set_minc(true);
            w.set_pinc(false);
            w.set_msize(dma_vals::Size::BITS8);
            w.set_psize(dma_vals::Size::BITS8);
            w.set_pl(dma_vals::Pl::HIGH);
            w.set_en(true);
        });

        usart.icr().write(|w| w.set_idle(true));
        usart.cr1().modify(|w| {
            w.set_idleie(true);
            w.set_peie(true);
            w.set_re(true);
        });
        usart.cr3().modify(|w| w.set_dmar(true));
        Ok(())
    }

    fn dma_remaining(&self) -> usize {
        usize::from(self.stream().ndtr().read().ndt())
    }

    fn clear_error_flags(&self) -> LineErrors {
        let pending = self.status();
        self.usart().icr().write(|w| {
            w.set_ore(true);
            w.set_fe(true);
            w.set_pe(true);
            w.set_ne(true);
            w.set_idle(true);
            w.set_cmf(true);
        });
        pending
    }

    fn disable_error_interrupt(&self) {
        self.usart().cr3().modify(|w| w.set_eie(false));
    }

    fn transmit_blocking(&self, data: &[u8], timeout: Duration) -> Result<(), PortError> {
        let usart = self.usart();
        let deadline = Instant::now().checked_add(timeout).unwrap_or(Instant::MAX);
        for &byte in data {
            while !usart.isr().read().txe() {
                if Instant::now() > deadline {
                    return Err(PortError::Timeout);
                }
            }
            usart.tdr().write(|w| w.set_dr(u16::from(byte)));
        }
        while !usart.isr().read().tc() {
            if Instant::now() > deadline {
                return Err(PortError::Timeout);
            }
        }
        Ok(())
    }
}

fn configure_pin(pin: AfPin) {
    let gpio = match pin.port {
        GpioPort::B => pac::GPIOB,
        GpioPort::D => pac::GPIOD,
    };
    let n = usize::from(pin.pin);
    gpio.afr(n / 8).modify(|w| w.set_afr(n % 8, pin.af));
    gpio.ospeedr().modify(|w| w.set_ospeedr(n, pac::gpio::vals::Ospeedr::HIGHSPEED));
    gpio.moder().modify(|w| w.set_moder(n, pac::gpio::vals::Moder::ALTERNATE));
}

/// Cortex-M7 data cache maintenance by address.
#[derive(Debug, Clone, Copy, Default)]
pub struct CortexM7DCache;

impl CacheMaintenance for CortexM7DCache {
    fn invalidate(&self, addr: *const u8, len: usize) {
        // SAFETY: DCIMVAC writes are stateless per line and the buffer covers
        // whole 32-byte lines (DmaRxBuffer alignment + CHANNEL_TABLE layout
        // checks), so no neighbouring data is discarded.
        unsafe {
            let mut cp = cortex_m::Peripherals::steal();
            cp.SCB.invalidate_dcache_by_address(addr as usize, len);
        }
    }
}
