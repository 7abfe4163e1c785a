//! Symbolic host instructions.
//!
//! Handlers never write machine words directly. They build `Insn` values through the
//! constructor functions below and a [`backend`](crate::backend) lowers them. Every `Insn`
//! lowers to exactly one AArch64 instruction, so branch offsets counted in `Insn`s are
//! also offsets in machine words.
use std::fmt;

/// A host general purpose register. Number 31 is the zero register.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct Reg(pub u8);

impl Reg {
    pub const ZR: Reg = Reg(31);
    /// guest status register
    pub const CC: Reg = Reg(26);
    /// base of the guest context block
    pub const CTX: Reg = Reg(27);
    /// guest program counter
    pub const PC: Reg = Reg(28);
    pub fn num(self) -> u32 { self.0 as u32 }
}

/// Operation width: the `W` (32-bit) or `X` (64-bit) register view.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Width {
    W32,
    X64,
}
pub use Width::{W32, X64};

impl Width {
    pub fn bits(self) -> u32 {
        match self {
            W32 => 32,
            X64 => 64,
        }
    }
    pub fn mask(self) -> u64 {
        match self {
            W32 => 0xffff_ffff,
            X64 => u64::MAX,
        }
    }
    pub fn sf(self) -> u32 { (self == X64) as u32 }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Cond {
    Eq = 0,
    Ne,
    Cs,
    Cc,
    Mi,
    Pl,
    Vs,
    Vc,
    Hi,
    Ls,
    Ge,
    Lt,
    Gt,
    Le,
    Al,
}
impl Cond {
    pub fn invert(self) -> Cond {
        use Cond::*;
        match self {
            Eq => Ne,
            Ne => Eq,
            Cs => Cc,
            Cc => Cs,
            Mi => Pl,
            Pl => Mi,
            Vs => Vc,
            Vc => Vs,
            Hi => Ls,
            Ls => Hi,
            Ge => Lt,
            Lt => Ge,
            Gt => Le,
            Le => Gt,
            Al => Al,
        }
    }
    pub fn name(self) -> &'static str {
        ["eq", "ne", "cs", "cc", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt", "le", "al"][self as usize]
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Shift {
    Lsl = 0,
    Lsr,
    Asr,
    Ror,
}
impl Shift {
    pub fn name(self) -> &'static str { ["lsl", "lsr", "asr", "ror"][self as usize] }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Arith {
    Add,
    Adds,
    Sub,
    Subs,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Logic {
    And,
    Bic,
    Orr,
    Orn,
    Eor,
    Ands,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ImmLogic {
    And,
    Orr,
    Eor,
    Ands,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BitfieldOp {
    Ubfx,
    Sbfx,
    Bfi,
    Bfxil,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MemSize {
    B = 0,
    H,
    W,
    X,
}
impl MemSize {
    pub fn bytes(self) -> usize { 1 << self as usize }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Index {
    Offset,
    Pre,
    Post,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Insn {
    Movz { sf: Width, rd: Reg, imm: u16, hw: u8 },
    Movk { sf: Width, rd: Reg, imm: u16, hw: u8 },
    Movn { sf: Width, rd: Reg, imm: u16, hw: u8 },
    /// 12-bit unsigned immediate
    ArithImm { sf: Width, op: Arith, rd: Reg, rn: Reg, imm: u16 },
    /// `rm` shifted by `shift` (not `Ror`) before the operation
    ArithReg { sf: Width, op: Arith, rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8 },
    LogicReg { sf: Width, op: Logic, rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8 },
    /// bitmask immediate: `ones` consecutive ones rotated right by `ror` within the width
    LogicImm { sf: Width, op: ImmLogic, rd: Reg, rn: Reg, ones: u8, ror: u8 },
    ShiftImm { sf: Width, op: Shift, rd: Reg, rn: Reg, amount: u8 },
    /// shift by `rm` modulo the width
    ShiftReg { sf: Width, op: Shift, rd: Reg, rn: Reg, rm: Reg },
    Bitfield { sf: Width, op: BitfieldOp, rd: Reg, rn: Reg, lsb: u8, width: u8 },
    /// byte reverse of a 32-bit register
    Rev { rd: Reg, rn: Reg },
    Clz { sf: Width, rd: Reg, rn: Reg },
    Udiv { sf: Width, rd: Reg, rn: Reg, rm: Reg },
    /// rd = ra - rn * rm
    Msub { sf: Width, rd: Reg, rn: Reg, rm: Reg, ra: Reg },
    Cset { rd: Reg, cond: Cond },
    /// offsets are counted in instructions from the branch itself
    BCond { cond: Cond, offset: i32 },
    Cbz { sf: Width, rt: Reg, nonzero: bool, offset: i32 },
    Load { size: MemSize, signed: bool, rt: Reg, rn: Reg, imm: i16, index: Index },
    Store { size: MemSize, rt: Reg, rn: Reg, imm: i16, index: Index },
    Ret,
    Brk { imm: u16 },
    /// no-op marker pointing at a diagnostic note of the block
    Hint { imm: u8 },
    /// the undefined word 0xffffffff terminating a trapped block
    Sentinel,
}

/// value of a bitmask immediate
pub fn bitmask(sf: Width, ones: u8, ror: u8) -> u64 {
    let run = (1u64 << ones) - 1;
    match sf {
        W32 => (run as u32).rotate_right(ror as u32) as u64,
        X64 => run.rotate_right(ror as u32),
    }
}

impl Insn {
    /// returns a copy of a branch with its offset replaced
    pub fn with_offset(self, offset: i32) -> Insn {
        match self {
            Insn::BCond { cond, .. } => Insn::BCond { cond, offset },
            Insn::Cbz { sf, rt, nonzero, .. } => Insn::Cbz { sf, rt, nonzero, offset },
            other => panic!("{:?} is not a branch", other),
        }
    }
    pub fn is_branch(&self) -> bool { matches!(self, Insn::BCond { .. } | Insn::Cbz { .. }) }
}

/*
 * constructors, named after the assembler mnemonics they stand for
 */
pub fn mov(sf: Width, rd: Reg, rm: Reg) -> Insn { orr(sf, rd, Reg::ZR, rm, Shift::Lsl, 0) }
pub fn movz(sf: Width, rd: Reg, imm: u16, hw: u8) -> Insn { Insn::Movz { sf, rd, imm, hw } }
pub fn movk(sf: Width, rd: Reg, imm: u16, hw: u8) -> Insn { Insn::Movk { sf, rd, imm, hw } }
pub fn movn(sf: Width, rd: Reg, imm: u16, hw: u8) -> Insn { Insn::Movn { sf, rd, imm, hw } }
pub fn add_imm(sf: Width, rd: Reg, rn: Reg, imm: u16) -> Insn {
    Insn::ArithImm { sf, op: Arith::Add, rd, rn, imm }
}
pub fn sub_imm(sf: Width, rd: Reg, rn: Reg, imm: u16) -> Insn {
    Insn::ArithImm { sf, op: Arith::Sub, rd, rn, imm }
}
pub fn add(sf: Width, rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8) -> Insn {
    Insn::ArithReg { sf, op: Arith::Add, rd, rn, rm, shift, amount }
}
pub fn sub(sf: Width, rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8) -> Insn {
    Insn::ArithReg { sf, op: Arith::Sub, rd, rn, rm, shift, amount }
}
pub fn neg(sf: Width, rd: Reg, rm: Reg) -> Insn { sub(sf, rd, Reg::ZR, rm, Shift::Lsl, 0) }
/// `cmn zr, rm, lsl #amount`: N and Z of `rm << amount`, C and V clear
pub fn cmn_lsl(rm: Reg, amount: u8) -> Insn {
    Insn::ArithReg { sf: W32, op: Arith::Adds, rd: Reg::ZR, rn: Reg::ZR, rm, shift: Shift::Lsl, amount }
}
pub fn cmp(sf: Width, rn: Reg, rm: Reg) -> Insn {
    Insn::ArithReg { sf, op: Arith::Subs, rd: Reg::ZR, rn, rm, shift: Shift::Lsl, amount: 0 }
}
pub fn and(sf: Width, rd: Reg, rn: Reg, rm: Reg) -> Insn {
    Insn::LogicReg { sf, op: Logic::And, rd, rn, rm, shift: Shift::Lsl, amount: 0 }
}
pub fn bic(sf: Width, rd: Reg, rn: Reg, rm: Reg) -> Insn {
    Insn::LogicReg { sf, op: Logic::Bic, rd, rn, rm, shift: Shift::Lsl, amount: 0 }
}
pub fn orr(sf: Width, rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8) -> Insn {
    Insn::LogicReg { sf, op: Logic::Orr, rd, rn, rm, shift, amount }
}
pub fn eor(sf: Width, rd: Reg, rn: Reg, rm: Reg, shift: Shift, amount: u8) -> Insn {
    Insn::LogicReg { sf, op: Logic::Eor, rd, rn, rm, shift, amount }
}
/// `and rd, rn, #(2^ones - 1)`
pub fn and_mask(sf: Width, rd: Reg, rn: Reg, ones: u8) -> Insn {
    Insn::LogicImm { sf, op: ImmLogic::And, rd, rn, ones, ror: 0 }
}
pub fn shift_imm(sf: Width, op: Shift, rd: Reg, rn: Reg, amount: u8) -> Insn {
    Insn::ShiftImm { sf, op, rd, rn, amount }
}
pub fn lsl(sf: Width, rd: Reg, rn: Reg, amount: u8) -> Insn { shift_imm(sf, Shift::Lsl, rd, rn, amount) }
pub fn lsr(sf: Width, rd: Reg, rn: Reg, amount: u8) -> Insn { shift_imm(sf, Shift::Lsr, rd, rn, amount) }
pub fn ror(sf: Width, rd: Reg, rn: Reg, amount: u8) -> Insn { shift_imm(sf, Shift::Ror, rd, rn, amount) }
pub fn shift_reg(sf: Width, op: Shift, rd: Reg, rn: Reg, rm: Reg) -> Insn { Insn::ShiftReg { sf, op, rd, rn, rm } }
pub fn ubfx(sf: Width, rd: Reg, rn: Reg, lsb: u8, width: u8) -> Insn {
    Insn::Bitfield { sf, op: BitfieldOp::Ubfx, rd, rn, lsb, width }
}
pub fn bfi(sf: Width, rd: Reg, rn: Reg, lsb: u8, width: u8) -> Insn {
    Insn::Bitfield { sf, op: BitfieldOp::Bfi, rd, rn, lsb, width }
}
pub fn bfxil(sf: Width, rd: Reg, rn: Reg, lsb: u8, width: u8) -> Insn {
    Insn::Bitfield { sf, op: BitfieldOp::Bfxil, rd, rn, lsb, width }
}
pub fn rev(rd: Reg, rn: Reg) -> Insn { Insn::Rev { rd, rn } }
pub fn clz(rd: Reg, rn: Reg) -> Insn { Insn::Clz { sf: W32, rd, rn } }
pub fn udiv(rd: Reg, rn: Reg, rm: Reg) -> Insn { Insn::Udiv { sf: W32, rd, rn, rm } }
pub fn msub(rd: Reg, rn: Reg, rm: Reg, ra: Reg) -> Insn { Insn::Msub { sf: W32, rd, rn, rm, ra } }
pub fn cset(rd: Reg, cond: Cond) -> Insn { Insn::Cset { rd, cond } }
pub fn cbz(sf: Width, rt: Reg) -> Insn { Insn::Cbz { sf, rt, nonzero: false, offset: 0 } }
pub fn cbnz(sf: Width, rt: Reg) -> Insn { Insn::Cbz { sf, rt, nonzero: true, offset: 0 } }
pub fn ldr(size: MemSize, rt: Reg, rn: Reg, imm: i16, index: Index) -> Insn {
    Insn::Load { size, signed: false, rt, rn, imm, index }
}
/// sign-extending load into a 32-bit register
pub fn ldrs(size: MemSize, rt: Reg, rn: Reg, imm: i16, index: Index) -> Insn {
    Insn::Load { size, signed: true, rt, rn, imm, index }
}
pub fn store(size: MemSize, rt: Reg, rn: Reg, imm: i16, index: Index) -> Insn {
    Insn::Store { size, rt, rn, imm, index }
}

/*
 * listing
 */
struct R(Reg, Width);
impl fmt::Display for R {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let p = if self.1 == X64 { 'x' } else { 'w' };
        if self.0 == Reg::ZR {
            write!(f, "{}zr", p)
        } else {
            write!(f, "{}{}", p, self.0 .0)
        }
    }
}
fn shifted(shift: Shift, amount: u8) -> String {
    if amount == 0 && shift == Shift::Lsl {
        String::new()
    } else {
        format!(", {} #{}", shift.name(), amount)
    }
}
fn mem_operand(rn: Reg, imm: i16, index: Index) -> String {
    match index {
        Index::Offset if imm == 0 => format!("[x{}]", rn.0),
        Index::Offset => format!("[x{}, #{}]", rn.0, imm),
        Index::Pre => format!("[x{}, #{}]!", rn.0, imm),
        Index::Post => format!("[x{}], #{}", rn.0, imm),
    }
}
impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Insn::*;
        match *self {
            Movz { sf, rd, imm, hw } | Movk { sf, rd, imm, hw } | Movn { sf, rd, imm, hw } => {
                let name = match self {
                    Movz { .. } => "movz",
                    Movk { .. } => "movk",
                    _ => "movn",
                };
                write!(f, "{} {}, #0x{:x}", name, R(rd, sf), imm)?;
                if hw != 0 {
                    write!(f, ", lsl #{}", 16 * hw as u32)?;
                }
                Ok(())
            }
            ArithImm { sf, op, rd, rn, imm } => {
                let name = ["add", "adds", "sub", "subs"][op as usize];
                write!(f, "{} {}, {}, #{}", name, R(rd, sf), R(rn, sf), imm)
            }
            ArithReg { sf, op, rd, rn, rm, shift, amount } => {
                let name = ["add", "adds", "sub", "subs"][op as usize];
                write!(f, "{} {}, {}, {}{}", name, R(rd, sf), R(rn, sf), R(rm, sf), shifted(shift, amount))
            }
            LogicReg { sf, op, rd, rn, rm, shift, amount } => {
                if op == Logic::Orr && rn == Reg::ZR && amount == 0 {
                    return write!(f, "mov {}, {}", R(rd, sf), R(rm, sf));
                }
                let name = ["and", "bic", "orr", "orn", "eor", "ands"][op as usize];
                write!(f, "{} {}, {}, {}{}", name, R(rd, sf), R(rn, sf), R(rm, sf), shifted(shift, amount))
            }
            LogicImm { sf, op, rd, rn, ones, ror } => {
                let name = ["and", "orr", "eor", "ands"][op as usize];
                write!(f, "{} {}, {}, #0x{:x}", name, R(rd, sf), R(rn, sf), bitmask(sf, ones, ror))
            }
            ShiftImm { sf, op, rd, rn, amount } => {
                write!(f, "{} {}, {}, #{}", op.name(), R(rd, sf), R(rn, sf), amount)
            }
            ShiftReg { sf, op, rd, rn, rm } => {
                write!(f, "{}v {}, {}, {}", op.name(), R(rd, sf), R(rn, sf), R(rm, sf))
            }
            Bitfield { sf, op, rd, rn, lsb, width } => {
                let name = ["ubfx", "sbfx", "bfi", "bfxil"][op as usize];
                write!(f, "{} {}, {}, #{}, #{}", name, R(rd, sf), R(rn, sf), lsb, width)
            }
            Rev { rd, rn } => write!(f, "rev {}, {}", R(rd, W32), R(rn, W32)),
            Clz { sf, rd, rn } => write!(f, "clz {}, {}", R(rd, sf), R(rn, sf)),
            Udiv { sf, rd, rn, rm } => write!(f, "udiv {}, {}, {}", R(rd, sf), R(rn, sf), R(rm, sf)),
            Msub { sf, rd, rn, rm, ra } => {
                write!(f, "msub {}, {}, {}, {}", R(rd, sf), R(rn, sf), R(rm, sf), R(ra, sf))
            }
            Cset { rd, cond } => write!(f, "cset {}, {}", R(rd, W32), cond.name()),
            BCond { cond, offset } => write!(f, "b.{} .{:+}", cond.name(), offset * 4),
            Cbz { sf, rt, nonzero, offset } => {
                let name = if nonzero { "cbnz" } else { "cbz" };
                write!(f, "{} {}, .{:+}", name, R(rt, sf), offset * 4)
            }
            Load { size, signed, rt, rn, imm, index } => {
                let sfx = ["b", "h", "", ""][size as usize];
                let sf = if size == MemSize::X { X64 } else { W32 };
                let name = if signed { "ldrs" } else { "ldr" };
                write!(f, "{}{} {}, {}", name, sfx, R(rt, sf), mem_operand(rn, imm, index))
            }
            Store { size, rt, rn, imm, index } => {
                let sfx = ["b", "h", "", ""][size as usize];
                let sf = if size == MemSize::X { X64 } else { W32 };
                write!(f, "str{} {}, {}", sfx, R(rt, sf), mem_operand(rn, imm, index))
            }
            Ret => write!(f, "ret"),
            Brk { imm } => write!(f, "brk #0x{:x}", imm),
            Hint { imm } => write!(f, "hint #{}", imm),
            Sentinel => write!(f, ".word 0xffffffff"),
        }
    }
}
