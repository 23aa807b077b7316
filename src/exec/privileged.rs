//! Privileged instructions that need more than a direct `Hart` method call.
//! `MRET`, `WFI` and `SFENCE.VMA` are simple enough to live inline in
//! [`super::execute`]; `SRET` needs an `mstatus.TSR` / privilege check that
//! belongs on the executor, not on [`Hart::sret`] itself.

use crate::hart::Hart;
use crate::trap::{Exception, Privilege};

/// SRET: illegal in U-mode, and illegal in S-mode when `mstatus.TSR` traps
/// supervisor returns to M-mode.
pub fn sret(hart: &mut Hart) -> Result<(), Exception> {
    match hart.priv_mode() {
        Privilege::User => Err(Exception::IllegalInstruction),
        Privilege::Supervisor if hart.mstatus_tsr() => Err(Exception::IllegalInstruction),
        _ => {
            hart.sret();
            Ok(())
        }
    }
}

/// MRET is only defined in M-mode; executing it from S or U mode traps
/// illegal instruction, same as any other instruction requiring privilege
/// the current mode doesn't have.
pub fn mret(hart: &mut Hart) -> Result<(), Exception> {
    if hart.priv_mode() != Privilege::Machine {
        return Err(Exception::IllegalInstruction);
    }
    hart.mret();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr;

    #[test]
    fn sret_in_user_mode_is_illegal() {
        let mut hart = Hart::new();
        hart.reset(0);
        hart.write_csr(csr::MSTATUS, 0).unwrap();
        hart.mret(); // drop from M to whatever MPP selects (User, by default 0)
        assert_eq!(hart.priv_mode(), Privilege::User);
        assert_eq!(sret(&mut hart).unwrap_err(), Exception::IllegalInstruction);
    }

    #[test]
    fn mret_outside_machine_mode_is_illegal() {
        let mut hart = Hart::new();
        hart.reset(0);
        hart.write_csr(csr::MSTATUS, 0).unwrap();
        hart.mret(); // drop from M to User, as above
        assert_eq!(hart.priv_mode(), Privilege::User);
        assert_eq!(mret(&mut hart).unwrap_err(), Exception::IllegalInstruction);
    }
}
