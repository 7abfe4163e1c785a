/// M68k register set helpers
use super::*;
use bitflags::bitflags;

/// Enumeration of the condition code register bits
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CCBit {
    C = 0,
    V = 1,
    Z = 2,
    N = 3,
    X = 4,
}

bitflags! {
    /// A set of condition code bits, positioned as in the CCR.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Flags: u8 {
        const C = 0x01;
        const V = 0x02;
        const Z = 0x04;
        const N = 0x08;
        const X = 0x10;
        const NZVC = 0x0f;
        const ALL = 0x1f;
    }
}
impl Flags {
    pub const NONE: Flags = Flags::empty();
}

/// Helper struct to map metadata about condition code register bits.
pub struct CCInfo {
    bit: CCBit,
    short: char,
}
#[rustfmt::skip]
static CC_TABLE: [CCInfo;5] = [
    CCInfo {bit: CCBit::X, short: 'X'},
    CCInfo {bit: CCBit::N, short: 'N'},
    CCInfo {bit: CCBit::Z, short: 'Z'},
    CCInfo {bit: CCBit::V, short: 'V'},
    CCInfo {bit: CCBit::C, short: 'C'},
];

impl CCBit {
    pub fn mask(self) -> u16 { 1 << self as u16 }
    pub fn flag(self) -> Flags { Flags::from_bits_truncate(self.mask() as u8) }
}

fn mask(bits: u32) -> u64 { (1u64 << bits) - 1 }
fn sign_extend(v: u64, bits: u32) -> i64 { ((v << (64 - bits)) as i64) >> (64 - bits) }

/// The status register. Only the low five bits are touched by the line-E family;
/// the system byte is carried along unchanged.
/// Like the rest of the reference model this struct doubles as the ALU.
/// Shift and rotate helpers take a width in bits (8/16/32) and a count of at least one.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct CCBits {
    pub reg: u16,
}

impl CCBits {
    pub fn set(&mut self, bit: CCBit, val: bool) {
        if val {
            self.reg |= bit.mask();
        } else {
            self.reg &= !bit.mask();
        }
    }
    pub fn is_set(&self, bit: CCBit) -> bool { self.reg & bit.mask() != 0 }
    pub fn ccr(&self) -> Flags { Flags::from_bits_truncate(self.reg as u8) }

    fn set_nz(&mut self, bits: u32, result: u64) {
        self.set(CCBit::N, bit!(result, bits - 1));
        self.set(CCBit::Z, result & mask(bits) == 0);
    }
    fn set_shift(&mut self, bits: u32, result: u64, c: bool, v: bool, with_x: bool) -> u32 {
        self.set_nz(bits, result);
        self.set(CCBit::V, v);
        self.set(CCBit::C, c);
        if with_x {
            self.set(CCBit::X, c);
        }
        (result & mask(bits)) as u32
    }
    pub fn lsl(&mut self, bits: u32, val: u32, n: u32) -> u32 {
        let v = val as u64 & mask(bits);
        let result = ((v as u128) << n) as u64 & mask(bits);
        let c = n <= bits && bit!(v, bits - n);
        self.set_shift(bits, result, c, false, true)
    }
    pub fn asl(&mut self, bits: u32, val: u32, n: u32) -> u32 {
        let v = val as u64 & mask(bits);
        // overflow if the bits shifted through the sign position are not all equal
        let overflow = if n >= bits {
            v != 0
        } else {
            let top = v >> (bits - 1 - n);
            top != 0 && top != mask(n + 1)
        };
        let result = ((v as u128) << n) as u64 & mask(bits);
        let c = n <= bits && bit!(v, bits - n);
        self.set_shift(bits, result, c, overflow, true)
    }
    pub fn lsr(&mut self, bits: u32, val: u32, n: u32) -> u32 {
        let v = val as u64 & mask(bits);
        let result = v.checked_shr(n).unwrap_or(0);
        let c = n <= bits && bit!(v, n - 1);
        self.set_shift(bits, result, c, false, true)
    }
    pub fn asr(&mut self, bits: u32, val: u32, n: u32) -> u32 {
        let v = val as u64 & mask(bits);
        let result = (sign_extend(v, bits) >> n.min(63)) as u64 & mask(bits);
        let c = if n <= bits { bit!(v, n - 1) } else { bit!(v, bits - 1) };
        self.set_shift(bits, result, c, false, true)
    }
    pub fn rol(&mut self, bits: u32, val: u32, n: u32) -> u32 {
        let v = val as u64 & mask(bits);
        let k = n % bits;
        let result = ((v << k) | (v >> (bits - k))) & mask(bits);
        self.set_shift(bits, result, bit!(result, 0), false, false)
    }
    pub fn ror(&mut self, bits: u32, val: u32, n: u32) -> u32 {
        let v = val as u64 & mask(bits);
        let k = n % bits;
        let result = ((v >> k) | (v << (bits - k))) & mask(bits);
        self.set_shift(bits, result, bit!(result, bits - 1), false, false)
    }
    /// rotate left through X: the ring is bits+1 wide with X above the operand
    pub fn roxl(&mut self, bits: u32, val: u32, n: u32) -> u32 {
        let ring = (val as u64 & mask(bits)) | (self.is_set(CCBit::X) as u64) << bits;
        let k = n % (bits + 1);
        let rotated = ((ring << k) | (ring >> (bits + 1 - k))) & mask(bits + 1);
        self.set_shift(bits, rotated, bit!(rotated, bits), false, true)
    }
    pub fn roxr(&mut self, bits: u32, val: u32, n: u32) -> u32 {
        let ring = (val as u64 & mask(bits)) | (self.is_set(CCBit::X) as u64) << bits;
        let k = n % (bits + 1);
        let rotated = ((ring >> k) | (ring << (bits + 1 - k))) & mask(bits + 1);
        self.set_shift(bits, rotated, bit!(rotated, bits), false, true)
    }
    /// flags of a bitfield operation: taken from the right-justified field
    pub fn field(&mut self, width: u32, field: u32) {
        self.set_nz(width, field as u64);
        self.set(CCBit::V, false);
        self.set(CCBit::C, false);
    }
    pub fn swap(&mut self, val: u32) -> u32 {
        let result = val.rotate_left(16);
        self.field(32, result);
        result
    }
}
use std::fmt;
impl fmt::Display for CCBits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, t) in CC_TABLE.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, concat!(green!("{}:"), "{}"), t.short, self.is_set(t.bit) as usize)?;
        }
        Ok(())
    }
}

/// Names usable in program setup lines and test criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Name {
    D(u8),
    A(u8),
    PC,
    SR,
}

impl Name {
    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.to_ascii_lowercase();
        match s.as_str() {
            "pc" => Some(Name::PC),
            "sr" => Some(Name::SR),
            "sp" => Some(Name::A(7)),
            _ => {
                let mut chars = s.chars();
                let kind = chars.next()?;
                let n = chars.as_str().parse::<u8>().ok().filter(|&n| n < 8)?;
                match kind {
                    'd' => Some(Name::D(n)),
                    'a' => Some(Name::A(n)),
                    _ => None,
                }
            }
        }
    }
}
impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Name::D(n) => write!(f, "D{}", n),
            Name::A(n) => write!(f, "A{}", n),
            Name::PC => write!(f, "PC"),
            Name::SR => write!(f, "SR"),
        }
    }
}

/// Provides storage and helpers for the M68k user-visible registers.
/// Register numbers follow the translator's convention: D0-D7 are 0-7, A0-A7 are 8-15.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Set {
    pub d: [u32; 8],
    pub a: [u32; 8],
    pub pc: u32,
    pub sr: CCBits,
}
impl Set {
    pub fn reset(&mut self) { *self = Set::default(); }
    pub fn get(&self, num: u8) -> u32 {
        match num {
            0..=7 => self.d[num as usize],
            8..=15 => self.a[num as usize - 8],
            _ => panic!("invalid register number {}", num),
        }
    }
    pub fn put(&mut self, num: u8, val: u32) {
        match num {
            0..=7 => self.d[num as usize] = val,
            8..=15 => self.a[num as usize - 8] = val,
            _ => panic!("invalid register number {}", num),
        }
    }
    pub fn get_register(&self, reg: Name) -> u32 {
        match reg {
            Name::D(n) => self.d[n as usize],
            Name::A(n) => self.a[n as usize],
            Name::PC => self.pc,
            Name::SR => self.sr.reg as u32,
        }
    }
    pub fn set_register(&mut self, reg: Name, val: u32) {
        match reg {
            Name::D(n) => self.d[n as usize] = val,
            Name::A(n) => self.a[n as usize] = val,
            Name::PC => self.pc = val,
            Name::SR => self.sr.reg = val as u16,
        }
    }
    pub fn ccr(&self) -> CCBits { self.sr }
}
impl fmt::Debug for Set {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { <Set as fmt::Display>::fmt(self, f) }
}
impl fmt::Display for Set {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, d) in self.d.iter().enumerate() {
            write!(f, concat!(blue!("D{}:"), "{:08x} "), i, d)?;
        }
        for (i, a) in self.a.iter().enumerate() {
            write!(f, concat!(blue!("A{}:"), "{:08x} "), i, a)?;
        }
        write!(f, concat!(blue!("PC:"), "{:08x} ", blue!("SR:"), "{:04x}"), self.pc, self.sr.reg)
    }
}
