//! Zicsr: the six CSR read-modify-write instructions.
//!
//! Grounded in `riscvemu/src/hart/platform/rv32zicsr.rs`'s shape (read old
//! value, compute new value, write, return old value to `rd`), extended
//! with the "no write occurs at all" suppression the base ISA spec
//! requires for `CSRRS`/`CSRRC` with `rs1 == x0` and `CSRRSI`/`CSRRCI` with
//! a zero immediate — read-only CSRs must not trap in that case, since no
//! write is attempted.

use crate::decode::{Decoded, Token};
use crate::hart::Hart;
use crate::trap::Exception;

pub fn execute(hart: &mut Hart, decoded: &Decoded) -> Result<(), Exception> {
    let addr = decoded.csr;
    let old = hart.read_csr(addr)?;

    match decoded.token {
        Token::Csrrw => hart.write_csr(addr, hart.x(decoded.rs1))?,
        Token::Csrrwi => hart.write_csr(addr, decoded.rs1 as u64)?,
        Token::Csrrs => {
            // rs1 here is a register index: x0 means "no write", per the
            // base ISA spec, regardless of the value x0 happens to hold.
            if decoded.rs1 != 0 {
                hart.write_csr(addr, old | hart.x(decoded.rs1))?;
            }
        }
        Token::Csrrc => {
            if decoded.rs1 != 0 {
                hart.write_csr(addr, old & !hart.x(decoded.rs1))?;
            }
        }
        Token::Csrrsi => {
            // rs1 here is the raw zero-extended uimm; zero itself (not a
            // register index) suppresses the write.
            let uimm = decoded.rs1 as u64;
            if uimm != 0 {
                hart.write_csr(addr, old | uimm)?;
            }
        }
        Token::Csrrci => {
            let uimm = decoded.rs1 as u64;
            if uimm != 0 {
                hart.write_csr(addr, old & !uimm)?;
            }
        }
        _ => unreachable!("execute() called on a non-CSR token"),
    }

    hart.set_x(decoded.rd, old);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr;

    fn decoded(token: Token, rd: u8, rs1: u8, csr_addr: u16) -> Decoded {
        Decoded { token, rd, rs1, rs2: 0, imm: 0, shamt: 0, csr: csr_addr }
    }

    #[test]
    fn csrrw_swaps_old_value_into_rd() {
        let mut hart = Hart::new();
        hart.write_csr(csr::MSCRATCH, 0xdead).unwrap();
        hart.set_x(2, 0xbeef);
        execute(&mut hart, &decoded(Token::Csrrw, 1, 2, csr::MSCRATCH)).unwrap();
        assert_eq!(hart.x(1), 0xdead);
        assert_eq!(hart.read_csr(csr::MSCRATCH).unwrap(), 0xbeef);
    }

    #[test]
    fn csrrs_with_x0_source_only_reads() {
        let mut hart = Hart::new();
        hart.write_csr(csr::MSCRATCH, 0x1).unwrap();
        execute(&mut hart, &decoded(Token::Csrrs, 1, 0, csr::MSCRATCH)).unwrap();
        assert_eq!(hart.x(1), 0x1);
        assert_eq!(hart.read_csr(csr::MSCRATCH).unwrap(), 0x1);
    }

    #[test]
    fn csrrsi_with_zero_uimm_does_not_write_a_read_only_csr() {
        let mut hart = Hart::new();
        // MVENDORID is read-only; a masked no-op write must not trap.
        execute(&mut hart, &decoded(Token::Csrrsi, 1, 0, csr::MVENDORID)).unwrap();
    }

    #[test]
    fn csrrc_clears_selected_bits() {
        let mut hart = Hart::new();
        hart.write_csr(csr::MSCRATCH, 0b1111).unwrap();
        hart.set_x(2, 0b0101);
        execute(&mut hart, &decoded(Token::Csrrc, 1, 2, csr::MSCRATCH)).unwrap();
        assert_eq!(hart.read_csr(csr::MSCRATCH).unwrap(), 0b1010);
    }
}
