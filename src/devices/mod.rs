//! Platform devices mounted on the bus: RAM, CLINT, PLIC and UART.
//!
//! Each device owns a byte-addressable register window and a `reset`.

pub mod clint;
pub mod plic;
pub mod ram;
pub mod uart;
