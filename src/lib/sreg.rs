// SREG bit positions.
pub const BIT_C: u8 = 0;
pub const BIT_Z: u8 = 1;
pub const BIT_N: u8 = 2;
pub const BIT_V: u8 = 3;
pub const BIT_S: u8 = 4;
pub const BIT_H: u8 = 5;
pub const BIT_T: u8 = 6;
pub const BIT_I: u8 = 7;

/// The status register: I T H S V N Z C, bit 7 down to bit 0.
///
/// The sign flag S is defined as N xor V; the setters for N and V keep it
/// consistent, so S can never silently drift from the flags it derives
/// from. Writing the whole byte (an OUT to the SREG address) takes the
/// byte as given, like the hardware does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRegister(u8);

impl StatusRegister {
    pub fn new() -> Self {
        StatusRegister(0)
    }

    pub fn from_byte(byte: u8) -> Self {
        StatusRegister(byte)
    }

    pub fn as_byte(&self) -> u8 {
        self.0
    }

    fn bit(&self, bit: u8) -> bool {
        self.0 & (1 << bit) != 0
    }

    fn put(&mut self, bit: u8, value: bool) {
        if value {
            self.0 |= 1 << bit;
        } else {
            self.0 &= !(1 << bit);
        }
    }

    pub fn c(&self) -> bool { self.bit(BIT_C) }
    pub fn z(&self) -> bool { self.bit(BIT_Z) }
    pub fn n(&self) -> bool { self.bit(BIT_N) }
    pub fn v(&self) -> bool { self.bit(BIT_V) }
    pub fn s(&self) -> bool { self.bit(BIT_S) }
    pub fn h(&self) -> bool { self.bit(BIT_H) }
    pub fn t(&self) -> bool { self.bit(BIT_T) }
    pub fn i(&self) -> bool { self.bit(BIT_I) }

    pub fn set_c(&mut self, value: bool) { self.put(BIT_C, value) }
    pub fn set_z(&mut self, value: bool) { self.put(BIT_Z, value) }
    pub fn set_h(&mut self, value: bool) { self.put(BIT_H, value) }
    pub fn set_t(&mut self, value: bool) { self.put(BIT_T, value) }
    pub fn set_i(&mut self, value: bool) { self.put(BIT_I, value) }

    pub fn set_n(&mut self, value: bool) {
        self.put(BIT_N, value);
        self.put(BIT_S, self.n() ^ self.v());
    }

    pub fn set_v(&mut self, value: bool) {
        self.put(BIT_V, value);
        self.put(BIT_S, self.n() ^ self.v());
    }

    /// Set both N and V, recomputing S once.
    pub fn set_nv(&mut self, n: bool, v: bool) {
        self.put(BIT_N, n);
        self.put(BIT_V, v);
        self.put(BIT_S, n ^ v);
    }

    /// Read a flag by its bit number (for BRBS/BRBC/BSET/BCLR).
    pub fn get_bit(&self, bit: u8) -> bool {
        self.bit(bit & 7)
    }

    /// Write a flag by its bit number, keeping S consistent when the
    /// target is N or V.
    pub fn put_bit(&mut self, bit: u8, value: bool) {
        match bit & 7 {
            BIT_N => self.set_n(value),
            BIT_V => self.set_v(value),
            b => self.put(b, value),
        }
    }

    /// Conventional "ithsvnzc" rendering with set flags in upper case.
    pub fn display(&self) -> String {
        const NAMES: [char; 8] = ['i', 't', 'h', 's', 'v', 'n', 'z', 'c'];
        let mut out = String::with_capacity(8);
        for (i, name) in NAMES.iter().enumerate() {
            let bit = 7 - i as u8;
            if self.bit(bit) {
                out.push(name.to_ascii_uppercase());
            } else {
                out.push(*name);
            }
        }
        out
    }
}

impl Default for StatusRegister {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_tracks_n_xor_v() {
        let mut sreg = StatusRegister::new();
        sreg.set_n(true);
        assert!(sreg.s());
        sreg.set_v(true);
        assert!(!sreg.s());
        sreg.set_n(false);
        assert!(sreg.s());
        sreg.set_nv(true, true);
        assert!(!sreg.s());
    }

    #[test]
    fn test_bit_addressing_matches_named_accessors() {
        let mut sreg = StatusRegister::new();
        sreg.put_bit(BIT_C, true);
        sreg.put_bit(BIT_H, true);
        assert!(sreg.c());
        assert!(sreg.h());
        assert_eq!(sreg.as_byte(), 0b0010_0001);
        sreg.put_bit(BIT_N, true);
        assert!(sreg.get_bit(BIT_S));
    }

    #[test]
    fn test_whole_byte_roundtrip() {
        let sreg = StatusRegister::from_byte(0xA5);
        assert_eq!(sreg.as_byte(), 0xA5);
        assert_eq!(StatusRegister::from_byte(0).display(), "ithsvnzc");
        assert_eq!(StatusRegister::from_byte(0xFF).display(), "ITHSVNZC");
    }
}
