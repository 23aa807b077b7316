//! M-extension: multiply/divide/remainder, plus their 32-bit "W" forms.
//!
//! Grounded in `riscvemu/src/hart/platform/rv32m.rs`'s per-instruction
//! style; widened to 64-bit operands and backed by [`crate::arithmetic`]'s
//! 128-bit widening multiply for the `MULH*` family. Division special-cases
//! (divide-by-zero returns all-ones/the dividend, `INT_MIN / -1` returns
//! `INT_MIN`) follow the RISC-V base ISA's defined results rather than
//! panicking on Rust's checked-arithmetic overflow.

use crate::arithmetic;
use crate::decode::{Decoded, Token};
use crate::hart::Hart;
use crate::utils::sign_extend_32;

fn div_signed(a: i64, b: i64) -> i64 {
    if b == 0 {
        -1
    } else if a == i64::MIN && b == -1 {
        i64::MIN
    } else {
        a.wrapping_div(b)
    }
}

fn rem_signed(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else if a == i64::MIN && b == -1 {
        0
    } else {
        a.wrapping_rem(b)
    }
}

fn div_unsigned(a: u64, b: u64) -> u64 {
    if b == 0 {
        u64::MAX
    } else {
        a / b
    }
}

fn rem_unsigned(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        a % b
    }
}

pub fn op(hart: &mut Hart, decoded: &Decoded) {
    let rs1 = hart.x(decoded.rs1);
    let rs2 = hart.x(decoded.rs2);
    let result = match decoded.token {
        Token::Mul => rs1.wrapping_mul(rs2),
        Token::Mulh => arithmetic::mul_signed_hi(rs1 as i64, rs2 as i64),
        Token::Mulhsu => arithmetic::mul_signed_unsigned_hi(rs1 as i64, rs2),
        Token::Mulhu => arithmetic::mul_unsigned_hi(rs1, rs2),
        Token::Div => div_signed(rs1 as i64, rs2 as i64) as u64,
        Token::Divu => div_unsigned(rs1, rs2),
        Token::Rem => rem_signed(rs1 as i64, rs2 as i64) as u64,
        Token::Remu => rem_unsigned(rs1, rs2),
        _ => unreachable!("op() called on a non-M-extension token"),
    };
    hart.set_x(decoded.rd, result);
}

fn div_signed_32(a: i32, b: i32) -> i32 {
    if b == 0 {
        -1
    } else if a == i32::MIN && b == -1 {
        i32::MIN
    } else {
        a.wrapping_div(b)
    }
}

fn rem_signed_32(a: i32, b: i32) -> i32 {
    if b == 0 {
        a
    } else if a == i32::MIN && b == -1 {
        0
    } else {
        a.wrapping_rem(b)
    }
}

fn div_unsigned_32(a: u32, b: u32) -> u32 {
    if b == 0 {
        u32::MAX
    } else {
        a / b
    }
}

fn rem_unsigned_32(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        a % b
    }
}

pub fn op_32(hart: &mut Hart, decoded: &Decoded) {
    let rs1 = hart.x(decoded.rs1) as u32;
    let rs2 = hart.x(decoded.rs2) as u32;
    let result = match decoded.token {
        Token::Mulw => rs1.wrapping_mul(rs2),
        Token::Divw => div_signed_32(rs1 as i32, rs2 as i32) as u32,
        Token::Divuw => div_unsigned_32(rs1, rs2),
        Token::Remw => rem_signed_32(rs1 as i32, rs2 as i32) as u32,
        Token::Remuw => rem_unsigned_32(rs1, rs2),
        _ => unreachable!("op_32() called on a non-M-extension-W token"),
    };
    hart.set_x(decoded.rd, sign_extend_32(result));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(token: Token, rd: u8, rs1: u8, rs2: u8) -> Decoded {
        Decoded { token, rd, rs1, rs2, imm: 0, shamt: 0, csr: 0 }
    }

    /// Signed overflow division, `INT64_MIN / -1`.
    #[test]
    fn div_int_min_by_minus_one_saturates_to_int_min() {
        let mut hart = Hart::new();
        hart.set_x(1, i64::MIN as u64);
        hart.set_x(2, (-1i64) as u64);
        op(&mut hart, &decoded(Token::Div, 3, 1, 2));
        assert_eq!(hart.x(3) as i64, i64::MIN);
    }

    #[test]
    fn rem_int_min_by_minus_one_is_zero() {
        let mut hart = Hart::new();
        hart.set_x(1, i64::MIN as u64);
        hart.set_x(2, (-1i64) as u64);
        op(&mut hart, &decoded(Token::Rem, 3, 1, 2));
        assert_eq!(hart.x(3), 0);
    }

    #[test]
    fn div_by_zero_is_all_ones() {
        let mut hart = Hart::new();
        hart.set_x(1, 42);
        hart.set_x(2, 0);
        op(&mut hart, &decoded(Token::Div, 3, 1, 2));
        assert_eq!(hart.x(3), u64::MAX);
        op(&mut hart, &decoded(Token::Divu, 4, 1, 2));
        assert_eq!(hart.x(4), u64::MAX);
    }

    #[test]
    fn rem_by_zero_returns_the_dividend() {
        let mut hart = Hart::new();
        hart.set_x(1, 42);
        hart.set_x(2, 0);
        op(&mut hart, &decoded(Token::Rem, 3, 1, 2));
        assert_eq!(hart.x(3), 42);
    }

    /// MULH with mixed-sign operands.
    #[test]
    fn mulh_of_int_min_and_two() {
        let mut hart = Hart::new();
        hart.set_x(1, i64::MIN as u64);
        hart.set_x(2, 2);
        op(&mut hart, &decoded(Token::Mulh, 3, 1, 2));
        assert_eq!(hart.x(3), 0xffff_ffff_ffff_ffff);
    }

    #[test]
    fn divw_sign_extends_a_32_bit_result() {
        let mut hart = Hart::new();
        hart.set_x(1, (-6i32 as u32) as u64);
        hart.set_x(2, 2);
        op_32(&mut hart, &decoded(Token::Divw, 3, 1, 2));
        assert_eq!(hart.x(3) as i64, -3);
    }
}
