//! Trap (exception and interrupt) cause encoding.
//!
//! References to the privileged spec refer to version 20211203.
//!
//! This generalises `riscvemu/src/hart/m_mode.rs`'s M-only `Exception` /
//! `Interrupt` / `Trap` enums to the full set of causes a hart delegating to
//! S-mode can take.

/// Privilege level, encoded to match the 2-bit fields used in `mstatus`
/// (MPP) and the privilege-level bits of a CSR address.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Privilege {
    User = 0,
    Supervisor = 1,
    Reserved = 2,
    Machine = 3,
}

impl Privilege {
    pub fn from_bits(bits: u64) -> Self {
        match bits & 0b11 {
            0 => Self::User,
            1 => Self::Supervisor,
            2 => Self::Reserved,
            3 => Self::Machine,
            _ => unreachable!(),
        }
    }

    pub fn bits(self) -> u64 {
        self as u64
    }
}

/// Synchronous exceptions, numbered per the privileged spec's mcause table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Exception {
    InstructionAddressMisaligned,
    InstructionAccessFault,
    IllegalInstruction,
    Breakpoint,
    LoadAddressMisaligned,
    LoadAccessFault,
    StoreAddressMisaligned,
    StoreAccessFault,
    UmodeEcall,
    SmodeEcall,
    MmodeEcall,
    InstructionPageFault,
    LoadPageFault,
    StorePageFault,
}

impl Exception {
    /// The exception code occupying mcause\[62:0\] (interrupt bit clear).
    pub fn code(self) -> u64 {
        match self {
            Self::InstructionAddressMisaligned => 0,
            Self::InstructionAccessFault => 1,
            Self::IllegalInstruction => 2,
            Self::Breakpoint => 3,
            Self::LoadAddressMisaligned => 4,
            Self::LoadAccessFault => 5,
            Self::StoreAddressMisaligned => 6,
            Self::StoreAccessFault => 7,
            Self::UmodeEcall => 8,
            Self::SmodeEcall => 9,
            Self::MmodeEcall => 11,
            Self::InstructionPageFault => 12,
            Self::LoadPageFault => 13,
            Self::StorePageFault => 15,
        }
    }

    /// ECALL cause appropriate to the privilege mode it was taken from.
    pub fn ecall_from(priv_mode: Privilege) -> Self {
        match priv_mode {
            Privilege::User => Self::UmodeEcall,
            Privilege::Supervisor => Self::SmodeEcall,
            Privilege::Machine | Privilege::Reserved => Self::MmodeEcall,
        }
    }
}

/// Interrupts, numbered per the privileged spec's mip/mie bit positions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Interrupt {
    SupervisorSoftware,
    MachineSoftware,
    SupervisorTimer,
    MachineTimer,
    SupervisorExternal,
    MachineExternal,
}

impl Interrupt {
    /// The bit position in mip/mie/sip/sie for this interrupt.
    pub fn code(self) -> u64 {
        match self {
            Self::SupervisorSoftware => 1,
            Self::MachineSoftware => 3,
            Self::SupervisorTimer => 5,
            Self::MachineTimer => 7,
            Self::SupervisorExternal => 9,
            Self::MachineExternal => 11,
        }
    }

    /// Priority order used to pick among several simultaneously-pending
    /// interrupts (highest first): MEI, MSI, MTI, SEI, SSI, STI.
    pub const PRIORITY: [Interrupt; 6] = [
        Interrupt::MachineExternal,
        Interrupt::MachineSoftware,
        Interrupt::MachineTimer,
        Interrupt::SupervisorExternal,
        Interrupt::SupervisorSoftware,
        Interrupt::SupervisorTimer,
    ];
}

/// An exception together with the `xtval` value it reports. Exceptions
/// the MMU and bus raise are plain `Exception` values (they don't know
/// the faulting instruction's encoding or PC); the executor pairs them
/// with a `tval` at the point it catches them, per §7: traps are
/// first-class values carrying `{kind, tval}`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    pub exception: Exception,
    pub tval: u64,
}

impl Fault {
    pub fn new(exception: Exception, tval: u64) -> Self {
        Self { exception, tval }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Trap {
    Exception(Exception),
    Interrupt(Interrupt),
}

impl Trap {
    /// The interrupt-bit component of mcause (bit 63 in RV64).
    pub fn interrupt_bit(self) -> u64 {
        match self {
            Self::Interrupt(_) => 1 << 63,
            Self::Exception(_) => 0,
        }
    }

    /// The exception-code component of mcause (mcause\[62:0\]).
    pub fn code(self) -> u64 {
        match self {
            Self::Interrupt(int) => int.code(),
            Self::Exception(ex) => ex.code(),
        }
    }

    /// The full mcause value for this trap.
    pub fn cause(self) -> u64 {
        self.interrupt_bit() | self.code()
    }

    /// Whether the trap can be delegated at all: synchronous exceptions are
    /// checked against medeleg, interrupts against mideleg — they are
    /// distinct registers, not a single one shared by both classes.
    pub fn delegation_mask_bit(self) -> u64 {
        1 << self.code()
    }
}
