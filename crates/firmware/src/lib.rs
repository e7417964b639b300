//! Serial board firmware
//!
//! STM32H743 board support for the circular-DMA serial receive driver
//! (`dma-uart`): USART + DMA1 register port, Cortex-M7 cache maintenance,
//! interrupt entry points and the board channel table.
//!
//! # Architecture
//!
//! ```text
//! Application tasks (main.rs)
//!         ↓ SerialRx
//! dma-uart Channel / Router
//!         ↑ notifications
//! serial::irq (USART vectors, DMA watch task)
//!         ↓
//! serial::stm32h7 (registers)
//! ```
//!
//! # Features
//!
//! - `hardware` - Build for STM32H7 target (embassy, PAC register access)
//! - `usart1`, `usart2`, `usart3` - Channels compiled in (all by default)
//! - `std` - Enable standard library (host tooling)
//!
//! # Examples
//!
//! ```bash
//! cargo build --release --target thumbv7em-none-eabihf --features hardware
//! ```

#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Critical correctness: deny these
#![deny(clippy::await_holding_lock)] // holding a blocking Mutex across .await is a bug
#![deny(unsafe_op_in_unsafe_fn)]
// unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer defmt over println! in lib code
#![warn(clippy::dbg_macro)] // dbg! should not be left in committed code
// Intentional allows for this codebase:
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod board;
pub mod boot;
pub mod exception_handlers;
pub mod serial;

pub use board::{SerialWiring, USART_KERNEL_HZ};
pub use serial::{classify_usart, StreamFlags, UsartIrq};

#[cfg(feature = "hardware")]
pub use serial::irq::{BoardChannel, BoardRx};
