//! RV64I base integer instructions: control transfer, loads/stores, and the
//! immediate/register ALU ops plus their 32-bit "W" counterparts.
//!
//! Grounded in `riscvemu/src/hart/platform/rv32i.rs`'s per-instruction
//! function style, widened to 64-bit registers and extended with the
//! `*w` forms RV32 has no need for.

use crate::bus::Bus;
use crate::decode::{Decoded, Token};
use crate::hart::Hart;
use crate::trap::{Exception, Fault};
use crate::utils::sign_extend_32;

/// Whether `[addr, addr + width)` straddles a 4 KiB page boundary. Loads
/// and stores that do are rejected before the MMU is consulted at all:
/// misaligned accesses that cross a page boundary are not supported.
fn crosses_page(addr: u64, width: u8) -> bool {
    let last = addr.wrapping_add(width as u64 - 1);
    (addr >> 12) != (last >> 12)
}

pub fn jal(hart: &mut Hart, decoded: &Decoded, inst_addr: u64) -> Result<(), Fault> {
    let target = inst_addr.wrapping_add(decoded.imm as u64);
    if target % 4 != 0 {
        return Err(Fault::new(Exception::InstructionAddressMisaligned, target));
    }
    hart.set_x(decoded.rd, inst_addr.wrapping_add(4));
    hart.set_pc(target);
    Ok(())
}

pub fn jalr(hart: &mut Hart, decoded: &Decoded, inst_addr: u64) -> Result<(), Fault> {
    let base = hart.x(decoded.rs1);
    let target = base.wrapping_add(decoded.imm as u64) & !1u64;
    if target % 4 != 0 {
        return Err(Fault::new(Exception::InstructionAddressMisaligned, target));
    }
    hart.set_x(decoded.rd, inst_addr.wrapping_add(4));
    hart.set_pc(target);
    Ok(())
}

pub fn branch(hart: &mut Hart, decoded: &Decoded, inst_addr: u64) -> Result<(), Fault> {
    let rs1 = hart.x(decoded.rs1);
    let rs2 = hart.x(decoded.rs2);
    let taken = match decoded.token {
        Token::Beq => rs1 == rs2,
        Token::Bne => rs1 != rs2,
        Token::Blt => (rs1 as i64) < (rs2 as i64),
        Token::Bge => (rs1 as i64) >= (rs2 as i64),
        Token::Bltu => rs1 < rs2,
        Token::Bgeu => rs1 >= rs2,
        _ => unreachable!("branch() called on a non-branch token"),
    };
    if !taken {
        return Ok(());
    }
    let target = inst_addr.wrapping_add(decoded.imm as u64);
    if target % 4 != 0 {
        return Err(Fault::new(Exception::InstructionAddressMisaligned, target));
    }
    hart.set_pc(target);
    Ok(())
}

fn load_width(token: Token) -> u8 {
    match token {
        Token::Lb | Token::Lbu => 1,
        Token::Lh | Token::Lhu => 2,
        Token::Lw | Token::Lwu => 4,
        Token::Ld => 8,
        _ => unreachable!("load_width() called on a non-load token"),
    }
}

pub fn load(hart: &mut Hart, bus: &Bus, decoded: &Decoded) -> Result<(), Fault> {
    let addr = hart.x(decoded.rs1).wrapping_add(decoded.imm as u64);
    let width = load_width(decoded.token);
    if crosses_page(addr, width) {
        return Err(Fault::new(Exception::LoadAddressMisaligned, addr));
    }
    let raw = hart
        .load(bus, addr, width)
        .map_err(|ex| Fault::new(ex, addr))?;
    let value = match decoded.token {
        Token::Lb => crate::utils::sign_extend(raw, 7),
        Token::Lh => crate::utils::sign_extend(raw, 15),
        Token::Lw => crate::utils::sign_extend(raw, 31),
        Token::Lbu | Token::Lhu | Token::Lwu | Token::Ld => raw,
        _ => unreachable!(),
    };
    hart.set_x(decoded.rd, value);
    Ok(())
}

pub fn store(hart: &mut Hart, bus: &Bus, decoded: &Decoded) -> Result<(), Fault> {
    let addr = hart.x(decoded.rs1).wrapping_add(decoded.imm as u64);
    let width = match decoded.token {
        Token::Sb => 1,
        Token::Sh => 2,
        Token::Sw => 4,
        Token::Sd => 8,
        _ => unreachable!("store() called on a non-store token"),
    };
    if crosses_page(addr, width) {
        return Err(Fault::new(Exception::StoreAddressMisaligned, addr));
    }
    let value = hart.x(decoded.rs2);
    hart.store(bus, addr, width, value)
        .map_err(|ex| Fault::new(ex, addr))
}

pub fn op_imm(hart: &mut Hart, decoded: &Decoded) {
    let rs1 = hart.x(decoded.rs1) as i64;
    let imm = decoded.imm;
    let result = match decoded.token {
        Token::Addi => rs1.wrapping_add(imm) as u64,
        Token::Slti => (rs1 < imm) as u64,
        Token::Sltiu => ((rs1 as u64) < (imm as u64)) as u64,
        Token::Xori => (rs1 ^ imm) as u64,
        Token::Ori => (rs1 | imm) as u64,
        Token::Andi => (rs1 & imm) as u64,
        Token::Slli => (rs1 as u64) << decoded.shamt,
        Token::Srli => (rs1 as u64) >> decoded.shamt,
        Token::Srai => (rs1 >> decoded.shamt) as u64,
        _ => unreachable!("op_imm() called on a non-OP-IMM token"),
    };
    hart.set_x(decoded.rd, result);
}

pub fn op(hart: &mut Hart, decoded: &Decoded) {
    let rs1 = hart.x(decoded.rs1);
    let rs2 = hart.x(decoded.rs2);
    let shamt = rs2 & 0x3f;
    let result = match decoded.token {
        Token::Add => rs1.wrapping_add(rs2),
        Token::Sub => rs1.wrapping_sub(rs2),
        Token::Sll => rs1 << shamt,
        Token::Slt => ((rs1 as i64) < (rs2 as i64)) as u64,
        Token::Sltu => (rs1 < rs2) as u64,
        Token::Xor => rs1 ^ rs2,
        Token::Srl => rs1 >> shamt,
        Token::Sra => ((rs1 as i64) >> shamt) as u64,
        Token::Or => rs1 | rs2,
        Token::And => rs1 & rs2,
        _ => unreachable!("op() called on a non-OP token"),
    };
    hart.set_x(decoded.rd, result);
}

pub fn op_imm_32(hart: &mut Hart, decoded: &Decoded) {
    let rs1 = hart.x(decoded.rs1) as u32;
    let result = match decoded.token {
        Token::Addiw => rs1.wrapping_add(decoded.imm as u32),
        Token::Slliw => rs1 << decoded.shamt,
        Token::Srliw => rs1 >> decoded.shamt,
        Token::Sraiw => ((rs1 as i32) >> decoded.shamt) as u32,
        _ => unreachable!("op_imm_32() called on a non-OP-IMM-32 token"),
    };
    hart.set_x(decoded.rd, sign_extend_32(result));
}

pub fn op_32(hart: &mut Hart, decoded: &Decoded) {
    let rs1 = hart.x(decoded.rs1) as u32;
    let rs2 = hart.x(decoded.rs2) as u32;
    let shamt = rs2 & 0x1f;
    let result = match decoded.token {
        Token::Addw => rs1.wrapping_add(rs2),
        Token::Subw => rs1.wrapping_sub(rs2),
        Token::Sllw => rs1 << shamt,
        Token::Srlw => rs1 >> shamt,
        Token::Sraw => ((rs1 as i32) >> shamt) as u32,
        _ => unreachable!("op_32() called on a non-OP-32 token"),
    };
    hart.set_x(decoded.rd, sign_extend_32(result));
}
