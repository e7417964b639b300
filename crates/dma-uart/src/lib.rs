//! Circular-DMA serial receive driver
//!
//! Turns a free-running, hardware-written circular DMA buffer into an ordered
//! byte stream that application tasks consume from a software ring buffer.
//!
//! # Architecture Layers
//!
//! ```text
//! Application task (receive / read_buffered / transmit)
//!         ↓
//! Channel controller (this crate - channel)
//!         ↓                         ↑ idle wake signal
//! Ring buffer (SPSC)  ←  Demultiplexer  ←  RX event ISR
//!                                ↑
//!                      DMA receive buffer (hardware-written)
//!         ↓
//! Hardware port (firmware crate - USART + DMA registers)
//! ```
//!
//! # Components
//!
//! - [`RingBuffer`] - fixed-capacity byte queue (`heapless::spsc::Queue`)
//! - [`Demultiplexer`] - copies newly DMA'd bytes into the ring, exactly once
//! - [`Channel`] - owns one DMA buffer + ring + cursor, reacts to hardware events
//! - [`SerialRx`] - the one consumer handle handed out by [`Channel::init`]
//! - [`Router`] - routes per-channel hardware notifications to their owner
//!
//! # Features
//!
//! - `std`: `std::error::Error` impls and the [`mocks`] hardware simulation
//! - `defmt`: `defmt::Format` derives and interrupt-path diagnostics
//!
//! # Example
//!
//! ```no_run
//! use dma_uart::{Channel, ChannelId, NoCacheMaintenance, SerialError};
//! use dma_uart::mocks::MockSerialPort;
//! use embassy_time::Duration;
//!
//! static USART1: Channel<'static, MockSerialPort, NoCacheMaintenance, 32, 129> =
//!     Channel::new(ChannelId::Usart1, MockSerialPort::new(ChannelId::Usart1), NoCacheMaintenance);
//!
//! fn example() -> Result<(), SerialError> {
//!     let mut rx = USART1.init()?;
//!     let mut frame = [0u8; 8];
//!     rx.receive(&mut frame, Duration::from_millis(100))?;
//!     Ok(())
//! }
//! ```

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer defmt over println! in lib code
// Pedantic lints suppressed for this driver crate:
#![allow(clippy::doc_markdown)] // register names in doc comments
#![allow(clippy::must_use_candidate)] // hardware accessors, callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod channel;
pub mod config;
pub mod demux;
pub mod dma_buffer;
pub mod error;
pub mod event;
#[cfg(any(test, feature = "std"))]
pub mod mocks;
pub mod port;
pub mod recovery;
pub mod ring_buffer;
pub mod router;

pub use channel::{Channel, ChannelState, IdleSignal, SerialRx};
pub use config::{ChannelConfig, ChannelId, CHANNEL_TABLE};
pub use demux::{ByteSink, DemuxReport, Demultiplexer};
pub use dma_buffer::DmaRxBuffer;
pub use error::{PortError, SerialError};
pub use event::{LineErrors, RxEvent};
pub use port::{CacheMaintenance, DataBits, NoCacheMaintenance, Parity, SerialPort, StopBits, UartConfig};
pub use recovery::RecoveryOutcome;
pub use ring_buffer::RingBuffer;
pub use router::{NotificationHandler, RouteError, Router};
