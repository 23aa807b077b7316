//! Hart state plus the fetch/decode/execute/trap tick loop.
//!
//! Grounded in `riscvemu/src/hart/m_mode.rs`'s `TrapCtrl` (interrupt
//! priority order, MIE/MPIE save-restore, trap-vector-address calculation)
//! and `riscvemu/src/hart/machine.rs`'s `Machine` (plain `u64` cycle/instret
//! counters), generalised from that M-only model to full M/S trap
//! delegation.

use crate::bus::Bus;
use crate::csr::{self, Csr};
use crate::decode::DecodeCache;
use crate::exec;
use crate::mmu::Mmu;
use crate::registers::Registers;
use crate::trap::{Exception, Fault, Interrupt, Privilege, Trap};

/// Decode cache capacity, fixed at compile time rather than made
/// configurable.
const DECODE_CACHE_CAPACITY: usize = 4096;

/// Architectural state of a single hart: registers, CSRs, privilege mode,
/// the decode cache, and the MMU it drives loads/stores/fetches through.
/// Does not own the bus: `tick` takes `&Bus` from the caller, since the
/// bus (and its devices) outlive any one hart and may be shared across
/// threads.
pub struct Hart {
    pc: u64,
    regs: Registers,
    csr: Csr,
    priv_mode: Privilege,
    wfi: bool,
    mcycle: u64,
    minstret: u64,
    mmu: Mmu,
    decode_cache: DecodeCache,
}

impl Default for Hart {
    fn default() -> Self {
        Self {
            pc: 0,
            regs: Registers::default(),
            csr: Csr::default(),
            priv_mode: Privilege::Machine,
            wfi: false,
            mcycle: 0,
            minstret: 0,
            mmu: Mmu::new(),
            decode_cache: DecodeCache::new(DECODE_CACHE_CAPACITY),
        }
    }
}

impl Hart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset every owned component and restart at `reset_pc`. Hart, MMU
    /// and CSR state are reset; the decode cache is dropped and rebuilt
    /// since it is a pure lookup accelerator with no architectural state.
    pub fn reset(&mut self, reset_pc: u64) {
        self.pc = reset_pc;
        self.regs = Registers::default();
        self.csr.reset();
        self.priv_mode = Privilege::Machine;
        self.wfi = false;
        self.mcycle = 0;
        self.minstret = 0;
        self.mmu.reset();
        self.decode_cache = DecodeCache::new(DECODE_CACHE_CAPACITY);
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
    }

    /// Read `x[which]`. `which` always comes from a 5-bit decode field, so
    /// it is never out of range; the register file's own bounds check is
    /// infallible here.
    pub fn x(&self, which: u8) -> u64 {
        self.regs.x(which).expect("decoded register index is 5 bits")
    }

    pub fn set_x(&mut self, which: u8, value: u64) {
        self.regs
            .set_x(which, value)
            .expect("decoded register index is 5 bits");
    }

    pub fn priv_mode(&self) -> Privilege {
        self.priv_mode
    }

    pub fn set_wfi(&mut self) {
        self.wfi = true;
    }

    pub fn is_wfi(&self) -> bool {
        self.wfi
    }

    pub fn mcycle(&self) -> u64 {
        self.mcycle
    }

    pub fn minstret(&self) -> u64 {
        self.minstret
    }

    /// Read a CSR with the architectural privilege check, translating a
    /// masking/privilege failure into an illegal-instruction exception.
    ///
    /// `mcycle`/`minstret` are special-cased: the hart tracks them as plain
    /// counters advanced once per tick (§4.8 step 7) rather than storing
    /// them in the CSR file's backing cells, so a CSR read must read
    /// through to those counters to stay consistent with `Hart::mcycle`/
    /// `Hart::minstret` (and the CLI/test accessors built on them).
    pub fn read_csr(&self, addr: u16) -> Result<u64, Exception> {
        if (self.priv_mode as u8) < (Privilege::Machine as u8) && matches!(addr, csr::MCYCLE | csr::MINSTRET) {
            return Err(Exception::IllegalInstruction);
        }
        match addr {
            csr::MCYCLE => Ok(self.mcycle),
            csr::MINSTRET => Ok(self.minstret),
            _ => self
                .csr
                .read(addr, self.priv_mode)
                .map_err(|_| Exception::IllegalInstruction),
        }
    }

    pub fn write_csr(&mut self, addr: u16, value: u64) -> Result<(), Exception> {
        if (self.priv_mode as u8) < (Privilege::Machine as u8) && matches!(addr, csr::MCYCLE | csr::MINSTRET) {
            return Err(Exception::IllegalInstruction);
        }
        match addr {
            csr::MCYCLE => {
                self.mcycle = value;
                Ok(())
            }
            csr::MINSTRET => {
                self.minstret = value;
                Ok(())
            }
            _ => self
                .csr
                .write(addr, value, self.priv_mode)
                .map_err(|_| Exception::IllegalInstruction),
        }
    }

    pub fn fetch(&mut self, bus: &Bus, addr: u64) -> Result<u32, Exception> {
        self.mmu
            .fetch(bus, &self.csr, self.priv_mode, addr, 4)
            .map(|word| word as u32)
    }

    pub fn load(&mut self, bus: &Bus, addr: u64, width: u8) -> Result<u64, Exception> {
        self.mmu.load(bus, &self.csr, self.priv_mode, addr, width)
    }

    pub fn store(&mut self, bus: &Bus, addr: u64, width: u8, value: u64) -> Result<(), Exception> {
        self.mmu
            .store(bus, &self.csr, self.priv_mode, addr, width, value)
    }

    pub fn flush_tlb(&mut self, vaddr: u64, asid: u16) {
        self.mmu.flush_tlb(vaddr, asid);
    }

    /// MRET: restore pc/privilege from the CSR file's trap-return state.
    pub fn mret(&mut self) {
        let (pc, priv_mode) = self.csr.mret();
        self.pc = pc;
        self.priv_mode = priv_mode;
    }

    /// SRET. Illegal (per §4.7) if `mstatus.TSR` is set while in S-mode;
    /// the caller (the executor) is responsible for that check before
    /// calling this.
    pub fn sret(&mut self) {
        let (pc, priv_mode) = self.csr.sret();
        self.pc = pc;
        self.priv_mode = priv_mode;
    }

    pub fn mstatus_tsr(&self) -> bool {
        self.csr.mstatus_tsr()
    }

    /// One fetch/decode/execute/trap cycle.
    ///
    /// `meip`/`seip`/`msip`/`mtip` are the four interrupt lines sampled
    /// from the platform (CLINT/PLIC) once per tick, after the previous
    /// instruction retires and before the next fetch. `update_counters`
    /// gates `mcycle`/`minstret` advancement, letting a caller single-step
    /// without perturbing the counters if it wants to (the core itself
    /// always passes `true` in normal operation).
    pub fn tick(
        &mut self,
        bus: &Bus,
        meip: bool,
        seip: bool,
        msip: bool,
        mtip: bool,
        update_counters: bool,
    ) {
        if self.wfi {
            let mip_and_mie = self.csr.read_unchecked(csr::MIP) & self.csr.read_unchecked(csr::MIE);
            if meip || seip || msip || mtip || mip_and_mie != 0 {
                self.wfi = false;
            } else {
                if update_counters {
                    self.mcycle += 1;
                }
                return;
            }
        }

        self.csr.update_interrupt_lines(meip, seip, msip, mtip);

        let inst_addr = self.pc;
        let retired = match self.step_instruction(bus, inst_addr) {
            Ok(()) => true,
            Err(fault) => {
                self.handle_trap(Trap::Exception(fault.exception), fault.tval, inst_addr);
                false
            }
        };

        self.dispatch_interrupt();

        if update_counters {
            self.mcycle += 1;
            if retired {
                self.minstret += 1;
            }
        }
    }

    /// Fetch, decode (via the LRU cache) and execute the instruction at
    /// `inst_addr`, speculatively advancing `pc` by 4 first: executors
    /// assume they see `pc` already post-incremented, so control-transfer
    /// instructions overwrite it rather than add to it.
    fn step_instruction(&mut self, bus: &Bus, inst_addr: u64) -> Result<(), Fault> {
        let word = self
            .fetch(bus, inst_addr)
            .map_err(|ex| Fault::new(ex, inst_addr))?;
        self.pc = inst_addr.wrapping_add(4);
        let decoded = self.decode_cache.lookup(word);
        exec::execute(self, bus, &decoded, inst_addr)
    }

    /// Whether `trap` is delegated to S-mode: exceptions consult
    /// `medeleg`, interrupts consult `mideleg` (§9's resolution of the
    /// source's register mixup), and delegation only ever applies when
    /// the hart is not already in M-mode.
    fn is_delegated(&self, trap: Trap) -> bool {
        if self.priv_mode == Privilege::Machine {
            return false;
        }
        let bit = 1u64 << trap.code();
        match trap {
            Trap::Exception(_) => self.csr.read_unchecked(csr::MEDELEG) & bit != 0,
            Trap::Interrupt(_) => self.csr.read_unchecked(csr::MIDELEG) & bit != 0,
        }
    }

    /// Enter the trap handler: compute cause/destination, write the
    /// x{epc,cause,tval} trio and status save/restore bits, switch
    /// privilege, and set `pc` from the destination's trap vector.
    fn handle_trap(&mut self, trap: Trap, tval: u64, epc: u64) {
        let destination = if self.is_delegated(trap) {
            Privilege::Supervisor
        } else {
            Privilege::Machine
        };
        let cause = trap.cause();
        let from = self.priv_mode;
        let tvec = match destination {
            Privilege::Machine => {
                self.csr.enter_trap_m(epc, cause, tval, from);
                self.csr.read_unchecked(csr::MTVEC)
            }
            _ => {
                self.csr.enter_trap_s(epc, cause, tval, from);
                self.csr.read_unchecked(csr::STVEC)
            }
        };
        self.priv_mode = destination;
        self.pc = Self::trap_pc(tvec, trap.code());
    }

    /// Direct mode (low 2 bits 0, or anything but 1): `tvec & ~3`. Vectored
    /// mode (low 2 bits 1): `(tvec & ~3) + 4 * cause_low`.
    fn trap_pc(tvec: u64, cause_low: u64) -> u64 {
        let base = tvec & !0b11;
        if tvec & 0b11 == 1 {
            base + 4 * cause_low
        } else {
            base
        }
    }

    /// Interrupt dispatch, run after the instruction/trap above (§4.8 step
    /// 6). Priority order MEI, MSI, MTI, SEI, SSI, STI; the first pending,
    /// enabled interrupt (enabled meaning the destination mode's IE bit is
    /// set, or the hart is currently strictly below that destination mode)
    /// is taken via the same trap path as a synchronous exception.
    fn dispatch_interrupt(&mut self) {
        let pending = self.csr.read_unchecked(csr::MIP) & self.csr.read_unchecked(csr::MIE);
        if pending == 0 {
            return;
        }
        let mideleg = self.csr.read_unchecked(csr::MIDELEG);
        for &interrupt in Interrupt::PRIORITY.iter() {
            let bit = 1u64 << interrupt.code();
            if pending & bit == 0 {
                continue;
            }
            let delegated = mideleg & bit != 0 && self.priv_mode != Privilege::Machine;
            let enabled = if delegated {
                match self.priv_mode {
                    Privilege::Supervisor => self.csr.mstatus_sie(),
                    _ => true, // User mode is strictly below the S destination.
                }
            } else {
                match self.priv_mode {
                    Privilege::Machine => self.csr.mstatus_mie(),
                    _ => true, // Below the M destination.
                }
            };
            if enabled {
                let epc = self.pc;
                self.handle_trap(Trap::Interrupt(interrupt), 0, epc);
                return;
            }
        }
    }
}
