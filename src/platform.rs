//! Wires a [`Hart`] to a [`Bus`] populated with the reference device set
//! and memory map. Grounded in `bin/emulate.rs`'s original inline setup,
//! which built its `Platform`-equivalent (decoder + eei + memory +
//! registers + csr bundle) once in `main` and drove it from a tick loop;
//! generalised here into a reusable struct so both the CLI and tests can
//! construct the same machine.

use std::sync::Arc;

use crate::bus::{Bus, BusError};
use crate::devices::clint::Clint;
use crate::devices::plic::Plic;
use crate::devices::ram::Ram;
use crate::devices::uart::Uart;
use crate::elf_utils::{self, ElfError};
use crate::hart::Hart;
use crate::trap::{Exception, Privilege};

pub const RAM_BASE: u64 = 0x8000_0000;
pub const RAM_SIZE: u64 = 0x0080_0000;
pub const CLINT_BASE: u64 = 0x0200_0000;
pub const CLINT_SIZE: u64 = 0xc000;
pub const PLIC_BASE: u64 = 0x0c00_0000;
pub const PLIC_SIZE: u64 = 0x0400_0000;
pub const UART_BASE: u64 = 0x1000_0000;
pub const UART_SIZE: u64 = 0x10;

const UART_PLIC_SOURCE: usize = 1;
const PLIC_NUM_SOURCES: usize = 1;
const PLIC_CONTEXT_M: usize = 0;
const PLIC_CONTEXT_S: usize = 1;
const PLIC_NUM_CONTEXTS: usize = 2;
const UART_FIFO_CAPACITY: usize = 16;

/// A single hart plus the reference bus/device layout: RAM at `RAM_BASE`,
/// CLINT and PLIC at their conventional addresses, one
/// UART wired to PLIC source 1. `ram`/`clint`/`plic`/`uart` are kept as
/// `Arc`s alongside the bus so a CLI (or test) can reach a device directly
/// (to drive the CLINT ticker thread, or read/write the UART FIFOs) without
/// going through memory-mapped loads and stores.
pub struct Platform {
    hart: Hart,
    bus: Bus,
    ram: Arc<Ram>,
    clint: Arc<Clint>,
    plic: Arc<Plic>,
    uart: Arc<Uart>,
}

impl Platform {
    pub fn new() -> Self {
        let ram = Arc::new(Ram::new(RAM_SIZE));
        let clint = Arc::new(Clint::new(1));
        let plic = Arc::new(Plic::new(PLIC_NUM_SOURCES, PLIC_NUM_CONTEXTS));
        let uart = Arc::new(Uart::new(UART_FIFO_CAPACITY));

        let mut bus = Bus::new();
        bus.mount(RAM_BASE, RAM_SIZE, ram.clone());
        bus.mount(CLINT_BASE, CLINT_SIZE, clint.clone());
        bus.mount(PLIC_BASE, PLIC_SIZE, plic.clone());
        bus.mount(UART_BASE, UART_SIZE, uart.clone());

        let mut hart = Hart::new();
        hart.reset(RAM_BASE);

        Self { hart, bus, ram, clint, plic, uart }
    }

    /// Load an ELF image's `PT_LOAD` segments into RAM and reset the hart
    /// to start at the image's entry point rather than `RAM_BASE`.
    pub fn load_elf(&mut self, path: &str) -> Result<(), ElfError> {
        let entry = elf_utils::load_elf(&self.ram, RAM_BASE, path)?;
        self.hart.set_pc(entry);
        Ok(())
    }

    /// One hart tick: sample the platform's four interrupt lines from
    /// CLINT/PLIC state and drive [`Hart::tick`].
    pub fn step(&mut self) {
        self.plic.update_ext(UART_PLIC_SOURCE, self.uart.irq());
        let meip = self.plic.get_interrupt(PLIC_CONTEXT_M);
        let seip = self.plic.get_interrupt(PLIC_CONTEXT_S);
        let msip = self.clint.machine_software_irq(0);
        let mtip = self.clint.machine_timer_irq(0);
        self.hart.tick(&self.bus, meip, seip, msip, mtip, true);
    }

    pub fn pc(&self) -> u64 {
        self.hart.pc()
    }

    pub fn mcycle(&self) -> u64 {
        self.hart.mcycle()
    }

    pub fn minstret(&self) -> u64 {
        self.hart.minstret()
    }

    pub fn priv_mode(&self) -> Privilege {
        self.hart.priv_mode()
    }

    /// Read `x[which]`, for monitoring/debugging a running machine from
    /// outside the core (a CLI debugger, or a test driving the platform
    /// purely through its public surface).
    pub fn x(&self, which: u8) -> u64 {
        self.hart.x(which)
    }

    pub fn read_csr(&self, addr: u16) -> Result<u64, Exception> {
        self.hart.read_csr(addr)
    }

    pub fn write_csr(&mut self, addr: u16, value: u64) -> Result<(), Exception> {
        self.hart.write_csr(addr, value)
    }

    /// Direct bus access, bypassing the MMU and hart entirely — for
    /// seeding device/RAM state (e.g. hand-written page tables) the way
    /// an external loader or debugger would, without executing any
    /// instructions to do it.
    pub fn bus_load(&self, addr: u64, width: u8) -> Result<u64, BusError> {
        self.bus.load(addr, width)
    }

    pub fn bus_store(&self, addr: u64, width: u8, value: u64) -> Result<(), BusError> {
        self.bus.store(addr, width, value)
    }

    pub fn clint(&self) -> Arc<Clint> {
        self.clint.clone()
    }

    pub fn uart(&self) -> Arc<Uart> {
        self.uart.clone()
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Device;

    #[test]
    fn boots_at_ram_base_with_no_elf_loaded() {
        let platform = Platform::new();
        assert_eq!(platform.pc(), RAM_BASE);
    }

    #[test]
    fn step_retires_a_harmless_instruction() {
        let mut platform = Platform::new();
        platform.ram.store(0, 4, 0b0010011).unwrap(); // addi x0, x0, 0
        platform.step();
        assert_eq!(platform.pc(), RAM_BASE + 4);
        assert_eq!(platform.minstret(), 1);
    }

    /// Wired through the full device stack: the CLINT ticker advances
    /// mtime past mtimecmp and the next step takes the machine timer
    /// interrupt via `Hart::tick`'s sampled `mtip` line.
    #[test]
    fn clint_timer_irq_reaches_the_hart_through_platform_step() {
        use crate::csr;

        let mut platform = Platform::new();
        platform.ram.store(0, 4, 0b0010011).unwrap();
        platform.hart.write_csr(csr::MSTATUS, 1 << 3).unwrap();
        platform.hart.write_csr(csr::MIE, 1 << 7).unwrap();
        platform.hart.write_csr(csr::MTVEC, 0x1000_0000).unwrap();

        platform.clint.store(0x4000, 8, 0).unwrap(); // mtimecmp[0] = 0
        platform.clint.tick(); // mtime = 1 > mtimecmp

        platform.step();

        assert_eq!(platform.pc(), 0x1000_0000);
        assert_eq!(platform.hart.read_csr(csr::MCAUSE).unwrap(), (1u64 << 63) | 7);
    }

    /// UART input routed through the PLIC reaches the hart as a machine
    /// external interrupt (meip), once source 1 is enabled for context 0
    /// with a non-zero priority and threshold 0.
    #[test]
    fn uart_irq_reaches_the_hart_via_plic_as_meip() {
        use crate::csr;

        let mut platform = Platform::new();
        platform.ram.store(0, 4, 0b0010011).unwrap();
        platform.hart.write_csr(csr::MSTATUS, 1 << 3).unwrap(); // MIE
        platform.hart.write_csr(csr::MIE, 1 << 11).unwrap(); // MEIE
        platform.hart.write_csr(csr::MTVEC, 0x1000_0000).unwrap();

        // priority[1] = 1, enable source 1 for context 0 (M-mode context).
        platform.plic.store(4, 4, 1).unwrap();
        platform.plic.store(0x2000, 4, 1 << 1).unwrap();

        platform.uart.putc(b'A');
        platform.step();

        assert_eq!(platform.pc(), 0x1000_0000);
        assert_eq!(platform.hart.read_csr(csr::MCAUSE).unwrap(), (1u64 << 63) | 11);
    }
}
