//! UART: character-level duplex device with bounded rx/tx queues and an
//! IRQ line.
//!
//! Grounded in `riscvemu/src/hart/memory.rs`'s `stdout` field (a
//! `queues::Queue<u8>` guarded at the call site), generalised to two
//! independently locked FIFOs so a reader thread draining `tx` and a
//! writer thread filling `rx` (§5's UART I/O thread) can run concurrently
//! with the hart.

use std::sync::Mutex;

use queues::{IsQueue, Queue};

use crate::bus::{BusError, Device};

const RX_FIFO_OFFSET: u64 = 0x0;
const TX_FIFO_OFFSET: u64 = 0x4;
const STATUS_OFFSET: u64 = 0x8;
const CONTROL_OFFSET: u64 = 0xc;

const STATUS_RX_VALID: u64 = 1 << 0;
const STATUS_TX_EMPTY: u64 = 1 << 2;
const STATUS_TX_FULL: u64 = 1 << 3;

const CONTROL_RST_TX: u64 = 1 << 0;
const CONTROL_RST_RX: u64 = 1 << 1;

struct Fifo {
    queue: Queue<u8>,
    capacity: usize,
}

impl Fifo {
    fn new(capacity: usize) -> Self {
        Self { queue: Queue::new(), capacity }
    }

    fn push(&mut self, byte: u8) -> bool {
        if self.queue.size() >= self.capacity {
            return false;
        }
        self.queue.add(byte).expect("fifo push");
        true
    }

    fn pop(&mut self) -> Option<u8> {
        self.queue.remove().ok()
    }

    fn is_empty(&self) -> bool {
        self.queue.size() == 0
    }

    fn is_full(&self) -> bool {
        self.queue.size() >= self.capacity
    }

    fn clear(&mut self) {
        while self.queue.remove().is_ok() {}
    }
}

/// Character-level duplex device: `rx` carries host-to-guest input,
/// `tx` carries guest-to-host output.
pub struct Uart {
    rx: Mutex<Fifo>,
    tx: Mutex<Fifo>,
    /// Set when the last tx byte is drained via `getc`, cleared by any
    /// rx-side read; folded into `Irq()` alongside rx non-emptiness.
    wait_ack: Mutex<bool>,
}

impl Uart {
    pub fn new(capacity: usize) -> Self {
        Self {
            rx: Mutex::new(Fifo::new(capacity)),
            tx: Mutex::new(Fifo::new(capacity)),
            wait_ack: Mutex::new(false),
        }
    }

    /// Host-side: push a byte of guest input. Returns `false` if `rx` is full.
    pub fn putc(&self, byte: u8) -> bool {
        let pushed = self.rx.lock().unwrap().push(byte);
        *self.wait_ack.lock().unwrap() = false;
        pushed
    }

    /// Host-side: drain the next byte of guest output, if any, latching
    /// `wait_ack` so the IRQ line reflects "last tx byte has been taken".
    pub fn getc(&self) -> Option<u8> {
        let byte = self.tx.lock().unwrap().pop();
        if byte.is_some() {
            *self.wait_ack.lock().unwrap() = true;
        }
        byte
    }

    pub fn irq(&self) -> bool {
        !self.rx.lock().unwrap().is_empty() || *self.wait_ack.lock().unwrap()
    }
}

impl Device for Uart {
    fn load(&self, offset: u64, width: u8) -> Result<u64, BusError> {
        if width != 4 {
            return Err(BusError::CrossesDeviceBoundary { addr: offset, width });
        }
        match offset {
            RX_FIFO_OFFSET => {
                let mut rx = self.rx.lock().unwrap();
                let byte = rx.pop().unwrap_or(0);
                drop(rx);
                *self.wait_ack.lock().unwrap() = false;
                Ok(byte as u64)
            }
            TX_FIFO_OFFSET => Ok(0),
            STATUS_OFFSET => {
                let mut status = 0;
                if !self.rx.lock().unwrap().is_empty() {
                    status |= STATUS_RX_VALID;
                }
                let tx = self.tx.lock().unwrap();
                if tx.is_empty() {
                    status |= STATUS_TX_EMPTY;
                }
                if tx.is_full() {
                    status |= STATUS_TX_FULL;
                }
                Ok(status)
            }
            CONTROL_OFFSET => Ok(0),
            _ => Err(BusError::Unmapped(offset)),
        }
    }

    fn store(&self, offset: u64, width: u8, value: u64) -> Result<(), BusError> {
        if width != 4 {
            return Err(BusError::CrossesDeviceBoundary { addr: offset, width });
        }
        match offset {
            RX_FIFO_OFFSET => Ok(()),
            TX_FIFO_OFFSET => {
                self.tx.lock().unwrap().push(value as u8);
                Ok(())
            }
            STATUS_OFFSET => Ok(()),
            CONTROL_OFFSET => {
                if value & CONTROL_RST_TX != 0 {
                    self.tx.lock().unwrap().clear();
                }
                if value & CONTROL_RST_RX != 0 {
                    self.rx.lock().unwrap().clear();
                }
                Ok(())
            }
            _ => Err(BusError::Unmapped(offset)),
        }
    }

    fn reset(&self) {
        self.rx.lock().unwrap().clear();
        self.tx.lock().unwrap().clear();
        *self.wait_ack.lock().unwrap() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rx_fifo_load_pops_front_byte_and_reports_validity() {
        let uart = Uart::new(8);
        assert_eq!(uart.load(STATUS_OFFSET, 4).unwrap(), STATUS_TX_EMPTY);
        uart.putc(b'A');
        assert_eq!(
            uart.load(STATUS_OFFSET, 4).unwrap(),
            STATUS_RX_VALID | STATUS_TX_EMPTY
        );
        assert_eq!(uart.load(RX_FIFO_OFFSET, 4).unwrap(), b'A' as u64);
        assert_eq!(uart.load(STATUS_OFFSET, 4).unwrap(), STATUS_TX_EMPTY);
    }

    #[test]
    fn status_reports_tx_full_and_tx_empty() {
        let uart = Uart::new(1);
        assert_eq!(uart.load(STATUS_OFFSET, 4).unwrap(), STATUS_TX_EMPTY);
        uart.store(TX_FIFO_OFFSET, 4, b'z' as u64).unwrap();
        assert_eq!(uart.load(STATUS_OFFSET, 4).unwrap(), STATUS_TX_FULL);
    }

    #[test]
    fn tx_fifo_store_is_drained_by_getc() {
        let uart = Uart::new(8);
        uart.store(TX_FIFO_OFFSET, 4, b'h' as u64).unwrap();
        uart.store(TX_FIFO_OFFSET, 4, b'i' as u64).unwrap();
        assert_eq!(uart.getc(), Some(b'h'));
        assert_eq!(uart.getc(), Some(b'i'));
        assert_eq!(uart.getc(), None);
    }

    #[test]
    fn wait_ack_latches_on_getc_and_clears_on_rx_read() {
        let uart = Uart::new(8);
        uart.store(TX_FIFO_OFFSET, 4, b'x' as u64).unwrap();
        assert!(!uart.irq());
        uart.getc();
        assert!(uart.irq());
        uart.putc(b'y');
        uart.load(RX_FIFO_OFFSET, 4).unwrap();
        assert!(!uart.irq());
    }

    #[test]
    fn control_register_resets_queues() {
        let uart = Uart::new(8);
        uart.putc(b'a');
        uart.store(TX_FIFO_OFFSET, 4, b'b' as u64).unwrap();
        uart.store(CONTROL_OFFSET, 4, CONTROL_RST_TX | CONTROL_RST_RX).unwrap();
        assert_eq!(uart.load(STATUS_OFFSET, 4).unwrap(), STATUS_TX_EMPTY);
        assert_eq!(uart.getc(), None);
    }

    #[test]
    fn fifo_respects_capacity() {
        let uart = Uart::new(1);
        assert!(uart.putc(b'a'));
        assert!(!uart.putc(b'b'));
    }
}
