//! Instruction decoding: a pure mapping from raw 16-bit words to operations.
//!
//! Dispatch is keyed on the top four bits, then on successively narrower
//! bit groups within each branch. Four instructions (JMP, CALL, LDS, STS)
//! are encoded in two words; the caller supplies the following word and
//! [`Op::words`] reports how many words the instruction occupies.
//! Unrecognized patterns decode to `None`; the caller reports them through
//! the signal bus.

/// A 16-bit pointer register used for indexed addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ptr {
    X,
    Y,
    Z,
}

impl Ptr {
    /// Index of the low register of the pair.
    pub fn low_reg(self) -> u8 {
        match self {
            Ptr::X => 26,
            Ptr::Y => 28,
            Ptr::Z => 30,
        }
    }
}

/// Pointer update mode for indexed loads and stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrMode {
    Plain,
    PostInc,
    PreDec,
}

/// A decoded instruction with its operand fields extracted.
///
/// `d` and `r` are register indices, `k` an immediate, `q` a displacement,
/// `a` an I/O address, `b` a register bit number, and `s` an SREG bit
/// number. JMP/CALL carry the concatenated 22-bit target as a byte
/// address into code memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Nop,
    // Register transfer.
    Mov { d: u8, r: u8 },
    Movw { d: u8, r: u8 },
    Ldi { d: u8, k: u8 },
    // Arithmetic.
    Add { d: u8, r: u8 },
    Adc { d: u8, r: u8 },
    Sub { d: u8, r: u8 },
    Subi { d: u8, k: u8 },
    Sbc { d: u8, r: u8 },
    Sbci { d: u8, k: u8 },
    Inc { d: u8 },
    Dec { d: u8 },
    Com { d: u8 },
    Neg { d: u8 },
    Adiw { d: u8, k: u8 },
    Sbiw { d: u8, k: u8 },
    // Multiply.
    Mul { d: u8, r: u8 },
    Muls { d: u8, r: u8 },
    Mulsu { d: u8, r: u8 },
    Fmul { d: u8, r: u8 },
    Fmuls { d: u8, r: u8 },
    Fmulsu { d: u8, r: u8 },
    // Logic.
    And { d: u8, r: u8 },
    Andi { d: u8, k: u8 },
    Or { d: u8, r: u8 },
    Ori { d: u8, k: u8 },
    Eor { d: u8, r: u8 },
    // Compare.
    Cp { d: u8, r: u8 },
    Cpc { d: u8, r: u8 },
    Cpi { d: u8, k: u8 },
    // Shift and bit manipulation.
    Lsr { d: u8 },
    Asr { d: u8 },
    Ror { d: u8 },
    Swap { d: u8 },
    Bset { s: u8 },
    Bclr { s: u8 },
    Bst { d: u8, b: u8 },
    Bld { d: u8, b: u8 },
    // Data memory.
    Lds { d: u8, k: u16 },
    Sts { k: u16, r: u8 },
    Ld { d: u8, ptr: Ptr, mode: PtrMode },
    St { r: u8, ptr: Ptr, mode: PtrMode },
    Ldd { d: u8, ptr: Ptr, q: u8 },
    Std { r: u8, ptr: Ptr, q: u8 },
    Lpm { d: u8, post_inc: bool },
    Push { r: u8 },
    Pop { d: u8 },
    // I/O.
    In { d: u8, a: u8 },
    Out { a: u8, r: u8 },
    Sbi { a: u8, b: u8 },
    Cbi { a: u8, b: u8 },
    Sbic { a: u8, b: u8 },
    Sbis { a: u8, b: u8 },
    // Control flow.
    Rjmp { k: i16 },
    Rcall { k: i16 },
    Jmp { k: u32 },
    Call { k: u32 },
    Ijmp,
    Icall,
    Ret,
    Reti,
    Brbs { s: u8, k: i8 },
    Brbc { s: u8, k: i8 },
    Cpse { d: u8, r: u8 },
    Sbrc { r: u8, b: u8 },
    Sbrs { r: u8, b: u8 },
    // Misc.
    Sleep,
    Wdr,
    Break,
}

impl Op {
    /// Number of flash words this instruction occupies.
    pub fn words(&self) -> u32 {
        match self {
            Op::Jmp { .. } | Op::Call { .. }
            | Op::Lds { .. } | Op::Sts { .. } => 2,
            _ => 1,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Nop => "nop",
            Op::Mov { .. } => "mov",
            Op::Movw { .. } => "movw",
            Op::Ldi { .. } => "ldi",
            Op::Add { .. } => "add",
            Op::Adc { .. } => "adc",
            Op::Sub { .. } => "sub",
            Op::Subi { .. } => "subi",
            Op::Sbc { .. } => "sbc",
            Op::Sbci { .. } => "sbci",
            Op::Inc { .. } => "inc",
            Op::Dec { .. } => "dec",
            Op::Com { .. } => "com",
            Op::Neg { .. } => "neg",
            Op::Adiw { .. } => "adiw",
            Op::Sbiw { .. } => "sbiw",
            Op::Mul { .. } => "mul",
            Op::Muls { .. } => "muls",
            Op::Mulsu { .. } => "mulsu",
            Op::Fmul { .. } => "fmul",
            Op::Fmuls { .. } => "fmuls",
            Op::Fmulsu { .. } => "fmulsu",
            Op::And { .. } => "and",
            Op::Andi { .. } => "andi",
            Op::Or { .. } => "or",
            Op::Ori { .. } => "ori",
            Op::Eor { .. } => "eor",
            Op::Cp { .. } => "cp",
            Op::Cpc { .. } => "cpc",
            Op::Cpi { .. } => "cpi",
            Op::Lsr { .. } => "lsr",
            Op::Asr { .. } => "asr",
            Op::Ror { .. } => "ror",
            Op::Swap { .. } => "swap",
            Op::Bset { .. } => "bset",
            Op::Bclr { .. } => "bclr",
            Op::Bst { .. } => "bst",
            Op::Bld { .. } => "bld",
            Op::Lds { .. } => "lds",
            Op::Sts { .. } => "sts",
            Op::Ld { .. } => "ld",
            Op::St { .. } => "st",
            Op::Ldd { .. } => "ldd",
            Op::Std { .. } => "std",
            Op::Lpm { .. } => "lpm",
            Op::Push { .. } => "push",
            Op::Pop { .. } => "pop",
            Op::In { .. } => "in",
            Op::Out { .. } => "out",
            Op::Sbi { .. } => "sbi",
            Op::Cbi { .. } => "cbi",
            Op::Sbic { .. } => "sbic",
            Op::Sbis { .. } => "sbis",
            Op::Rjmp { .. } => "rjmp",
            Op::Rcall { .. } => "rcall",
            Op::Jmp { .. } => "jmp",
            Op::Call { .. } => "call",
            Op::Ijmp => "ijmp",
            Op::Icall => "icall",
            Op::Ret => "ret",
            Op::Reti => "reti",
            Op::Brbs { .. } => "brbs",
            Op::Brbc { .. } => "brbc",
            Op::Cpse { .. } => "cpse",
            Op::Sbrc { .. } => "sbrc",
            Op::Sbrs { .. } => "sbrs",
            Op::Sleep => "sleep",
            Op::Wdr => "wdr",
            Op::Break => "break",
        }
    }
}

// Operand field extraction.

/// Destination register, bits [8:4].
fn d5(w: u16) -> u8 {
    ((w >> 4) & 0x1F) as u8
}

/// Source register, bit 9 plus bits [3:0].
fn r5(w: u16) -> u8 {
    (((w >> 5) & 0x10) | (w & 0x0F)) as u8
}

/// Upper-half destination register (r16..r31), bits [7:4].
fn d4(w: u16) -> u8 {
    16 + ((w >> 4) & 0x0F) as u8
}

/// 8-bit immediate, bits [11:8] and [3:0].
fn k8(w: u16) -> u8 {
    (((w >> 4) & 0xF0) | (w & 0x0F)) as u8
}

/// Sign-extended 12-bit displacement, bits [11:0].
fn k12(w: u16) -> i16 {
    ((w << 4) as i16) >> 4
}

/// Sign-extended 7-bit branch displacement, bits [9:3].
fn k7(w: u16) -> i8 {
    ((((w >> 3) & 0x7F) as u8) << 1) as i8 >> 1
}

/// 22-bit JMP/CALL target: bits [8:4] and [0] concatenated above the
/// second instruction word. The result addresses code memory in bytes.
fn k22(w: u16, w2: u16) -> u32 {
    ((w as u32 & 0x01F0) << 13) | ((w as u32 & 1) << 16) | w2 as u32
}

/// Decode one instruction. `w2` is the word following `w` in flash, used
/// only by the two-word encodings.
pub fn decode(w: u16, w2: u16) -> Option<Op> {
    match w >> 12 {
        0x0 => match (w >> 8) & 0xF {
            0x0 => {
                if w == 0x0000 {
                    Some(Op::Nop)
                } else {
                    None
                }
            }
            0x1 => Some(Op::Movw {
                d: ((w >> 4) & 0xF) as u8 * 2,
                r: (w & 0xF) as u8 * 2,
            }),
            0x2 => Some(Op::Muls { d: d4(w), r: 16 + (w & 0xF) as u8 }),
            0x3 => {
                let d = 16 + ((w >> 4) & 0x7) as u8;
                let r = 16 + (w & 0x7) as u8;
                match ((w >> 7) & 1, (w >> 3) & 1) {
                    (0, 0) => Some(Op::Mulsu { d, r }),
                    (0, 1) => Some(Op::Fmul { d, r }),
                    (1, 0) => Some(Op::Fmuls { d, r }),
                    _ => Some(Op::Fmulsu { d, r }),
                }
            }
            0x4..=0x7 => Some(Op::Cpc { d: d5(w), r: r5(w) }),
            0x8..=0xB => Some(Op::Sbc { d: d5(w), r: r5(w) }),
            _ => Some(Op::Add { d: d5(w), r: r5(w) }),
        },
        0x1 => match (w >> 10) & 0x3 {
            0x0 => Some(Op::Cpse { d: d5(w), r: r5(w) }),
            0x1 => Some(Op::Cp { d: d5(w), r: r5(w) }),
            0x2 => Some(Op::Sub { d: d5(w), r: r5(w) }),
            _ => Some(Op::Adc { d: d5(w), r: r5(w) }),
        },
        0x2 => match (w >> 10) & 0x3 {
            0x0 => Some(Op::And { d: d5(w), r: r5(w) }),
            0x1 => Some(Op::Eor { d: d5(w), r: r5(w) }),
            0x2 => Some(Op::Or { d: d5(w), r: r5(w) }),
            _ => Some(Op::Mov { d: d5(w), r: r5(w) }),
        },
        0x3 => Some(Op::Cpi { d: d4(w), k: k8(w) }),
        0x4 => Some(Op::Sbci { d: d4(w), k: k8(w) }),
        0x5 => Some(Op::Subi { d: d4(w), k: k8(w) }),
        0x6 => Some(Op::Ori { d: d4(w), k: k8(w) }),
        0x7 => Some(Op::Andi { d: d4(w), k: k8(w) }),
        0x8 | 0xA => {
            // LDD/STD with displacement; q bits live in three places.
            let q = (((w >> 8) & 0x20) | ((w >> 7) & 0x18) | (w & 0x7)) as u8;
            let ptr = if w & 0x8 != 0 { Ptr::Y } else { Ptr::Z };
            if (w >> 9) & 1 == 0 {
                Some(Op::Ldd { d: d5(w), ptr, q })
            } else {
                Some(Op::Std { r: d5(w), ptr, q })
            }
        }
        0x9 => match (w >> 8) & 0xF {
            0x0 | 0x1 => {
                let d = d5(w);
                match w & 0xF {
                    0x0 => Some(Op::Lds { d, k: w2 }),
                    0x1 => Some(Op::Ld { d, ptr: Ptr::Z, mode: PtrMode::PostInc }),
                    0x2 => Some(Op::Ld { d, ptr: Ptr::Z, mode: PtrMode::PreDec }),
                    0x4 => Some(Op::Lpm { d, post_inc: false }),
                    0x5 => Some(Op::Lpm { d, post_inc: true }),
                    0x9 => Some(Op::Ld { d, ptr: Ptr::Y, mode: PtrMode::PostInc }),
                    0xA => Some(Op::Ld { d, ptr: Ptr::Y, mode: PtrMode::PreDec }),
                    0xC => Some(Op::Ld { d, ptr: Ptr::X, mode: PtrMode::Plain }),
                    0xD => Some(Op::Ld { d, ptr: Ptr::X, mode: PtrMode::PostInc }),
                    0xE => Some(Op::Ld { d, ptr: Ptr::X, mode: PtrMode::PreDec }),
                    0xF => Some(Op::Pop { d }),
                    _ => None,
                }
            }
            0x2 | 0x3 => {
                let r = d5(w);
                match w & 0xF {
                    0x0 => Some(Op::Sts { k: w2, r }),
                    0x1 => Some(Op::St { r, ptr: Ptr::Z, mode: PtrMode::PostInc }),
                    0x2 => Some(Op::St { r, ptr: Ptr::Z, mode: PtrMode::PreDec }),
                    0x9 => Some(Op::St { r, ptr: Ptr::Y, mode: PtrMode::PostInc }),
                    0xA => Some(Op::St { r, ptr: Ptr::Y, mode: PtrMode::PreDec }),
                    0xC => Some(Op::St { r, ptr: Ptr::X, mode: PtrMode::Plain }),
                    0xD => Some(Op::St { r, ptr: Ptr::X, mode: PtrMode::PostInc }),
                    0xE => Some(Op::St { r, ptr: Ptr::X, mode: PtrMode::PreDec }),
                    0xF => Some(Op::Push { r }),
                    _ => None,
                }
            }
            0x4 | 0x5 => match w & 0xF {
                0x0 => Some(Op::Com { d: d5(w) }),
                0x1 => Some(Op::Neg { d: d5(w) }),
                0x2 => Some(Op::Swap { d: d5(w) }),
                0x3 => Some(Op::Inc { d: d5(w) }),
                0x5 => Some(Op::Asr { d: d5(w) }),
                0x6 => Some(Op::Lsr { d: d5(w) }),
                0x7 => Some(Op::Ror { d: d5(w) }),
                0xA => Some(Op::Dec { d: d5(w) }),
                0x8 => {
                    if (w >> 8) & 1 == 0 {
                        let s = ((w >> 4) & 0x7) as u8;
                        if w & 0x80 == 0 {
                            Some(Op::Bset { s })
                        } else {
                            Some(Op::Bclr { s })
                        }
                    } else {
                        match w {
                            0x9508 => Some(Op::Ret),
                            0x9518 => Some(Op::Reti),
                            0x9588 => Some(Op::Sleep),
                            0x9598 => Some(Op::Break),
                            0x95A8 => Some(Op::Wdr),
                            0x95C8 => Some(Op::Lpm { d: 0, post_inc: false }),
                            _ => None,
                        }
                    }
                }
                0x9 => match w {
                    0x9409 => Some(Op::Ijmp),
                    0x9509 => Some(Op::Icall),
                    _ => None,
                },
                0xC | 0xD => Some(Op::Jmp { k: k22(w, w2) }),
                0xE | 0xF => Some(Op::Call { k: k22(w, w2) }),
                _ => None,
            },
            0x6 => Some(Op::Adiw {
                d: 24 + 2 * ((w >> 4) & 0x3) as u8,
                k: (((w >> 2) & 0x30) | (w & 0xF)) as u8,
            }),
            0x7 => Some(Op::Sbiw {
                d: 24 + 2 * ((w >> 4) & 0x3) as u8,
                k: (((w >> 2) & 0x30) | (w & 0xF)) as u8,
            }),
            0x8 => Some(Op::Cbi { a: ((w >> 3) & 0x1F) as u8, b: (w & 0x7) as u8 }),
            0x9 => Some(Op::Sbic { a: ((w >> 3) & 0x1F) as u8, b: (w & 0x7) as u8 }),
            0xA => Some(Op::Sbi { a: ((w >> 3) & 0x1F) as u8, b: (w & 0x7) as u8 }),
            0xB => Some(Op::Sbis { a: ((w >> 3) & 0x1F) as u8, b: (w & 0x7) as u8 }),
            _ => Some(Op::Mul { d: d5(w), r: r5(w) }),
        },
        0xB => {
            let a = (((w >> 5) & 0x30) | (w & 0xF)) as u8;
            if w & 0x0800 == 0 {
                Some(Op::In { d: d5(w), a })
            } else {
                Some(Op::Out { a, r: d5(w) })
            }
        }
        0xC => Some(Op::Rjmp { k: k12(w) }),
        0xD => Some(Op::Rcall { k: k12(w) }),
        0xE => Some(Op::Ldi { d: d4(w), k: k8(w) }),
        _ => match (w >> 10) & 0x3 {
            0x0 => Some(Op::Brbs { s: (w & 0x7) as u8, k: k7(w) }),
            0x1 => Some(Op::Brbc { s: (w & 0x7) as u8, k: k7(w) }),
            0x2 => {
                if w & 0x8 != 0 {
                    return None;
                }
                let b = (w & 0x7) as u8;
                if (w >> 9) & 1 == 0 {
                    Some(Op::Bld { d: d5(w), b })
                } else {
                    Some(Op::Bst { d: d5(w), b })
                }
            }
            _ => {
                if w & 0x8 != 0 {
                    return None;
                }
                let b = (w & 0x7) as u8;
                if (w >> 9) & 1 == 0 {
                    Some(Op::Sbrc { r: d5(w), b })
                } else {
                    Some(Op::Sbrs { r: d5(w), b })
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jmp_concatenation() {
        // Bytes 0x0C 0x94 0x66 0x00: JMP with target byte address 0x0066.
        assert_eq!(decode(0x940C, 0x0066), Some(Op::Jmp { k: 0x0066 }));
        // High target bits come from the first word.
        assert_eq!(decode(0x940D, 0x0000), Some(Op::Jmp { k: 0x10000 }));
        assert_eq!(decode(0x95FF, 0xFFFF), Some(Op::Call { k: 0x3FFFFF }));
    }

    #[test]
    fn test_decode_is_idempotent() {
        for &w in &[0x0000u16, 0x0C01, 0x940C, 0xE70F, 0xCFFF, 0x9508] {
            assert_eq!(decode(w, 0x1234), decode(w, 0x1234));
        }
    }

    #[test]
    fn test_register_register_group() {
        // ADD r16, r17.
        assert_eq!(decode(0x0F01, 0), Some(Op::Add { d: 16, r: 17 }));
        // SUB r16, r17.
        assert_eq!(decode(0x1B01, 0), Some(Op::Sub { d: 16, r: 17 }));
        // CPC r0, r16.
        assert_eq!(decode(0x0600, 0), Some(Op::Cpc { d: 0, r: 16 }));
        // EOR r1, r1.
        assert_eq!(decode(0x2411, 0), Some(Op::Eor { d: 1, r: 1 }));
        // MOV r31, r0.
        assert_eq!(decode(0x2DF0, 0), Some(Op::Mov { d: 31, r: 0 }));
    }

    #[test]
    fn test_immediate_group() {
        // LDI r16, 0x7F.
        assert_eq!(decode(0xE70F, 0), Some(Op::Ldi { d: 16, k: 0x7F }));
        // CPI r16, 0x05.
        assert_eq!(decode(0x3005, 0), Some(Op::Cpi { d: 16, k: 0x05 }));
        // SUBI r24, 0xFF.
        assert_eq!(decode(0x5F8F, 0), Some(Op::Subi { d: 24, k: 0xFF }));
        // SBCI r25, 0xFF.
        assert_eq!(decode(0x4F9F, 0), Some(Op::Sbci { d: 25, k: 0xFF }));
        // ANDI r20, 0x0F.
        assert_eq!(decode(0x704F, 0), Some(Op::Andi { d: 20, k: 0x0F }));
    }

    #[test]
    fn test_load_store_group() {
        // LD r5, X+.
        assert_eq!(decode(0x905D, 0),
                   Some(Op::Ld { d: 5, ptr: Ptr::X, mode: PtrMode::PostInc }));
        // ST -Y, r7.
        assert_eq!(decode(0x927A, 0),
                   Some(Op::St { r: 7, ptr: Ptr::Y, mode: PtrMode::PreDec }));
        // LDD r1, Z+2.
        assert_eq!(decode(0x8012, 0), Some(Op::Ldd { d: 1, ptr: Ptr::Z, q: 2 }));
        // STD Y+63, r2.
        assert_eq!(decode(0xAE2F, 0), Some(Op::Std { r: 2, ptr: Ptr::Y, q: 63 }));
        // LDS r3, 0x0100.
        assert_eq!(decode(0x9030, 0x0100), Some(Op::Lds { d: 3, k: 0x0100 }));
        // STS 0x0100, r3.
        assert_eq!(decode(0x9230, 0x0100), Some(Op::Sts { k: 0x0100, r: 3 }));
        // PUSH r0 / POP r1.
        assert_eq!(decode(0x920F, 0), Some(Op::Push { r: 0 }));
        assert_eq!(decode(0x901F, 0), Some(Op::Pop { d: 1 }));
    }

    #[test]
    fn test_branch_group() {
        // RJMP .+1.
        assert_eq!(decode(0xC001, 0), Some(Op::Rjmp { k: 1 }));
        // RJMP .-1 (all-ones displacement).
        assert_eq!(decode(0xCFFF, 0), Some(Op::Rjmp { k: -1 }));
        // BREQ .+1 is BRBS with the Z bit.
        assert_eq!(decode(0xF009, 0), Some(Op::Brbs { s: 1, k: 1 }));
        // BRCC .-2.
        assert_eq!(decode(0xF7F0, 0), Some(Op::Brbc { s: 0, k: -2 }));
        // SBRS r16, 0.
        assert_eq!(decode(0xFF00, 0), Some(Op::Sbrs { r: 16, b: 0 }));
    }

    #[test]
    fn test_io_group() {
        // IN r17, 0x3F.
        assert_eq!(decode(0xB71F, 0), Some(Op::In { d: 17, a: 0x3F }));
        // OUT 0x3F, r16.
        assert_eq!(decode(0xBF0F, 0), Some(Op::Out { a: 0x3F, r: 16 }));
        // SBI 0x05, 3.
        assert_eq!(decode(0x9A2B, 0), Some(Op::Sbi { a: 0x05, b: 3 }));
        // CBI 0x05, 3.
        assert_eq!(decode(0x982B, 0), Some(Op::Cbi { a: 0x05, b: 3 }));
    }

    #[test]
    fn test_word_counts() {
        assert_eq!(decode(0x940C, 0).unwrap().words(), 2);
        assert_eq!(decode(0x9030, 0).unwrap().words(), 2);
        assert_eq!(decode(0x0000, 0).unwrap().words(), 1);
        assert_eq!(decode(0xC001, 0).unwrap().words(), 1);
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(decode(0x0000, 0).unwrap().mnemonic(), "nop");
        assert_eq!(decode(0x940C, 0).unwrap().mnemonic(), "jmp");
        assert_eq!(decode(0x9508, 0).unwrap().mnemonic(), "ret");
        assert_eq!(decode(0xE70F, 0).unwrap().mnemonic(), "ldi");
        assert_eq!(decode(0x920F, 0).unwrap().mnemonic(), "push");
    }

    #[test]
    fn test_reserved_patterns_are_rejected() {
        // Reserved low block (0x0001..=0x00FF).
        assert_eq!(decode(0x0042, 0), None);
        // SBRS with bit 3 set.
        assert_eq!(decode(0xFF08, 0), None);
        // Unassigned one-operand slot.
        assert_eq!(decode(0x9408 | 0x100 | 0x28, 0), None);
        // DES/unused 0x940B slot.
        assert_eq!(decode(0x940B, 0), None);
    }
}
