//! Flag computation for the ALU, bit-for-bit per the instruction set
//! reference. Each flag is its own boolean expression over the sign and
//! half-carry bits of the operands and the result.

use crate::sreg::StatusRegister;

fn bit7(value: u8) -> bool {
    value & 0x80 != 0
}

fn bit3(value: u8) -> bool {
    value & 0x08 != 0
}

/// Flags for ADD/ADC: `r` must already be `rd + rr (+ carry)`.
pub fn add8(sreg: &mut StatusRegister, rd: u8, rr: u8, r: u8) {
    let (rd7, rr7, r7) = (bit7(rd), bit7(rr), bit7(r));
    let (rd3, rr3, r3) = (bit3(rd), bit3(rr), bit3(r));
    sreg.set_h((rd3 && rr3) || (rr3 && !r3) || (!r3 && rd3));
    sreg.set_c((rd7 && rr7) || (rr7 && !r7) || (!r7 && rd7));
    sreg.set_nv(r7, (rd7 && rr7 && !r7) || (!rd7 && !rr7 && r7));
    sreg.set_z(r == 0);
}

/// Flags for SUB/SUBI/CP/NEG and, with `set_z` false, for SBC/SBCI/CPC.
///
/// `r` must already be `rd - rr (- carry)`; the formulas take the
/// original operands either way. When `set_z` is false the Z flag is only
/// ever cleared, so a multi-byte compare chain stays zero only if every
/// byte compared equal.
pub fn sub8(sreg: &mut StatusRegister, rd: u8, rr: u8, r: u8, set_z: bool) {
    let (rd7, rr7, r7) = (bit7(rd), bit7(rr), bit7(r));
    let (rd3, rr3, r3) = (bit3(rd), bit3(rr), bit3(r));
    sreg.set_h((!rd3 && rr3) || (rr3 && r3) || (r3 && !rd3));
    sreg.set_c((!rd7 && rr7) || (rr7 && r7) || (r7 && !rd7));
    sreg.set_nv(r7, (rd7 && !rr7 && !r7) || (!rd7 && rr7 && r7));
    if set_z {
        sreg.set_z(r == 0);
    } else if r != 0 {
        sreg.set_z(false);
    }
}

/// Flags for AND/OR/EOR: V cleared, N and Z from the result.
pub fn logic8(sreg: &mut StatusRegister, r: u8) {
    sreg.set_nv(bit7(r), false);
    sreg.set_z(r == 0);
}

/// Flags for ADIW on the 16-bit result.
pub fn adiw16(sreg: &mut StatusRegister, old: u16, r: u16) {
    let old15 = old & 0x8000 != 0;
    let r15 = r & 0x8000 != 0;
    sreg.set_c(!r15 && old15);
    sreg.set_nv(r15, !old15 && r15);
    sreg.set_z(r == 0);
}

/// Flags for SBIW on the 16-bit result.
pub fn sbiw16(sreg: &mut StatusRegister, old: u16, r: u16) {
    let old15 = old & 0x8000 != 0;
    let r15 = r & 0x8000 != 0;
    sreg.set_c(r15 && !old15);
    sreg.set_nv(r15, old15 && !r15);
    sreg.set_z(r == 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_signed_overflow_edge() {
        let mut sreg = StatusRegister::new();
        // 0x7F + 0x01: signed overflow into the negative range.
        add8(&mut sreg, 0x7F, 0x01, 0x80);
        assert!(sreg.v());
        assert!(sreg.n());
        assert!(!sreg.z());
        assert!(!sreg.c());
        assert!(sreg.h());
        assert!(!sreg.s());
    }

    #[test]
    fn test_add_unsigned_carry() {
        let mut sreg = StatusRegister::new();
        add8(&mut sreg, 0xFF, 0x01, 0x00);
        assert!(sreg.c());
        assert!(sreg.z());
        assert!(!sreg.v());
        assert!(!sreg.n());
    }

    #[test]
    fn test_sub_borrow_edge() {
        let mut sreg = StatusRegister::new();
        // 0x00 - 0x01: borrow and negative, not zero.
        sub8(&mut sreg, 0x00, 0x01, 0xFF, true);
        assert!(sreg.c());
        assert!(sreg.n());
        assert!(!sreg.z());
        assert!(!sreg.v());
    }

    #[test]
    fn test_sbc_only_clears_zero() {
        let mut sreg = StatusRegister::new();
        // Low byte compared equal: Z set.
        sub8(&mut sreg, 0x12, 0x12, 0x00, true);
        assert!(sreg.z());
        // High byte also equal: Z must stay set through the chain.
        sub8(&mut sreg, 0x34, 0x34, 0x00, false);
        assert!(sreg.z());
        // A nonzero byte clears it for good.
        sub8(&mut sreg, 0x35, 0x34, 0x01, false);
        assert!(!sreg.z());
        // A later zero byte must not set it again.
        sub8(&mut sreg, 0x34, 0x34, 0x00, false);
        assert!(!sreg.z());
    }

    #[test]
    fn test_logic_clears_overflow() {
        let mut sreg = StatusRegister::new();
        sreg.set_v(true);
        logic8(&mut sreg, 0x80);
        assert!(!sreg.v());
        assert!(sreg.n());
        assert!(sreg.s());
        logic8(&mut sreg, 0x00);
        assert!(sreg.z());
        assert!(!sreg.s());
    }

    #[test]
    fn test_adiw_sbiw_edges() {
        let mut sreg = StatusRegister::new();
        adiw16(&mut sreg, 0xFFFF, 0x0000);
        assert!(sreg.c());
        assert!(sreg.z());
        adiw16(&mut sreg, 0x7FFF, 0x8000);
        assert!(sreg.v());
        assert!(sreg.n());
        sbiw16(&mut sreg, 0x0000, 0xFFFF);
        assert!(sreg.c());
        assert!(sreg.n());
        assert!(!sreg.z());
        sbiw16(&mut sreg, 0x8000, 0x7FFF);
        assert!(sreg.v());
    }
}
