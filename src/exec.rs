//! Reference executor for symbolic host code.
//!
//! Interprets a translated block with AArch64 semantics so translations can be run and
//! checked without the host CPU. Data accesses are big-endian, matching the guest memory
//! image the translated code operates on.
use super::*;
use crate::insn::*;
use crate::memory::{AccessType, Memory};

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Nzcv {
    pub n: bool,
    pub z: bool,
    pub c: bool,
    pub v: bool,
}

/// How a block handed control back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exit {
    Return,
    /// `brk` with its immediate (the guest exception vector)
    Break(u16),
}

const STEP_LIMIT: u64 = 1 << 20;

fn ones(n: u32) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1 << n) - 1
    }
}
fn sext(v: u64, bits: u32) -> i64 { ((v << (64 - bits)) as i64) >> (64 - bits) }

fn add_with_carry(sf: Width, a: u64, b: u64, carry: bool) -> (u64, Nzcv) {
    let bits = sf.bits();
    let (a, b) = (a & sf.mask(), b & sf.mask());
    let unsigned = a as u128 + b as u128 + carry as u128;
    let result = unsigned as u64 & sf.mask();
    let signed = sext(a, bits) as i128 + sext(b, bits) as i128 + carry as i128;
    let flags = Nzcv {
        n: bit!(result, bits - 1),
        z: result == 0,
        c: unsigned > sf.mask() as u128,
        v: signed != sext(result, bits) as i128,
    };
    (result, flags)
}

fn shift_value(sf: Width, val: u64, shift: Shift, amount: u32) -> u64 {
    let bits = sf.bits();
    let v = val & sf.mask();
    let amount = amount % bits;
    let r = match shift {
        Shift::Lsl => v << amount,
        Shift::Lsr => v >> amount,
        Shift::Asr => (sext(v, bits) >> amount) as u64,
        Shift::Ror => match sf {
            W32 => (v as u32).rotate_right(amount) as u64,
            X64 => v.rotate_right(amount),
        },
    };
    r & sf.mask()
}

pub struct HostCpu {
    pub x: [u64; 31],
    pub nzcv: Nzcv,
    /// number of instructions executed
    pub executed: u64,
    /// diagnostic markers passed
    pub hints: Vec<u8>,
}

impl HostCpu {
    pub fn new() -> HostCpu {
        HostCpu {
            x: [0; 31],
            nzcv: Nzcv::default(),
            executed: 0,
            hints: Vec::new(),
        }
    }
    pub fn reg(&self, r: Reg) -> u64 {
        if r == Reg::ZR {
            0
        } else {
            self.x[r.0 as usize]
        }
    }
    fn read(&self, r: Reg, sf: Width) -> u64 { self.reg(r) & sf.mask() }
    fn write(&mut self, r: Reg, sf: Width, val: u64) {
        if r != Reg::ZR {
            self.x[r.0 as usize] = val & sf.mask();
        }
    }
    pub fn cond(&self, cond: Cond) -> bool {
        let Nzcv { n, z, c, v } = self.nzcv;
        match cond {
            Cond::Eq => z,
            Cond::Ne => !z,
            Cond::Cs => c,
            Cond::Cc => !c,
            Cond::Mi => n,
            Cond::Pl => !n,
            Cond::Vs => v,
            Cond::Vc => !v,
            Cond::Hi => c && !z,
            Cond::Ls => !(c && !z),
            Cond::Ge => n == v,
            Cond::Lt => n != v,
            Cond::Gt => !z && n == v,
            Cond::Le => !(!z && n == v),
            Cond::Al => true,
        }
    }
    fn address(&mut self, rn: Reg, imm: i16, index: Index) -> Result<(u32, AccessType), Error> {
        let base = self.reg(rn);
        let moved = (base as i64).wrapping_add(imm as i64) as u64;
        let addr = match index {
            Index::Offset => moved,
            Index::Pre => {
                self.write(rn, X64, moved);
                moved
            }
            Index::Post => {
                self.write(rn, X64, moved);
                base
            }
        };
        let atype = if rn == Reg::CTX { AccessType::Context } else { AccessType::Data };
        u32::try_from(addr)
            .map(|a| (a, atype))
            .map_err(|_| memory_err!("host address {:016x} is outside guest memory", addr))
    }

    /// Runs `code` from its first instruction until `ret` or `brk`.
    pub fn run(&mut self, code: &[Insn], mem: &mut Memory) -> Result<Exit, Error> {
        let mut pc = 0usize;
        loop {
            let insn = *code
                .get(pc)
                .ok_or_else(|| runtime_err!(None, "host code ran past the end of the block (index {})", pc))?;
            self.executed += 1;
            if self.executed > STEP_LIMIT {
                return Err(runtime_err!(None, "host step limit exceeded"));
            }
            let mut next = pc as i64 + 1;
            match insn {
                Insn::Movz { sf, rd, imm, hw } => self.write(rd, sf, (imm as u64) << (16 * hw as u32)),
                Insn::Movn { sf, rd, imm, hw } => self.write(rd, sf, !((imm as u64) << (16 * hw as u32))),
                Insn::Movk { sf, rd, imm, hw } => {
                    let shift = 16 * hw as u32;
                    let v = self.reg(rd) & !(0xffff << shift) | (imm as u64) << shift;
                    self.write(rd, sf, v)
                }
                Insn::ArithImm { sf, op, rd, rn, imm } => self.arith(sf, op, rd, self.read(rn, sf), imm as u64),
                Insn::ArithReg { sf, op, rd, rn, rm, shift, amount } => {
                    let b = shift_value(sf, self.reg(rm), shift, amount as u32);
                    self.arith(sf, op, rd, self.read(rn, sf), b)
                }
                Insn::LogicReg { sf, op, rd, rn, rm, shift, amount } => {
                    let a = self.read(rn, sf);
                    let b = shift_value(sf, self.reg(rm), shift, amount as u32);
                    let r = match op {
                        Logic::And | Logic::Ands => a & b,
                        Logic::Bic => a & !b,
                        Logic::Orr => a | b,
                        Logic::Orn => a | !b,
                        Logic::Eor => a ^ b,
                    } & sf.mask();
                    if op == Logic::Ands {
                        self.logic_flags(sf, r);
                    }
                    self.write(rd, sf, r)
                }
                Insn::LogicImm { sf, op, rd, rn, ones, ror } => {
                    let a = self.read(rn, sf);
                    let b = bitmask(sf, ones, ror);
                    let r = match op {
                        ImmLogic::And | ImmLogic::Ands => a & b,
                        ImmLogic::Orr => a | b,
                        ImmLogic::Eor => a ^ b,
                    };
                    if op == ImmLogic::Ands {
                        self.logic_flags(sf, r);
                    }
                    self.write(rd, sf, r)
                }
                Insn::ShiftImm { sf, op, rd, rn, amount } => {
                    self.write(rd, sf, shift_value(sf, self.reg(rn), op, amount as u32))
                }
                Insn::ShiftReg { sf, op, rd, rn, rm } => {
                    let amount = (self.reg(rm) % sf.bits() as u64) as u32;
                    self.write(rd, sf, shift_value(sf, self.reg(rn), op, amount))
                }
                Insn::Bitfield { sf, op, rd, rn, lsb, width } => {
                    let (lsb, width) = (lsb as u32, width as u32);
                    let src = self.read(rn, sf);
                    let field = ones(width);
                    let r = match op {
                        BitfieldOp::Ubfx => (src >> lsb) & field,
                        BitfieldOp::Sbfx => sext((src >> lsb) & field, width) as u64,
                        BitfieldOp::Bfi => self.read(rd, sf) & !(field << lsb) | (src & field) << lsb,
                        BitfieldOp::Bfxil => self.read(rd, sf) & !field | (src >> lsb) & field,
                    };
                    self.write(rd, sf, r)
                }
                Insn::Rev { rd, rn } => self.write(rd, W32, (self.reg(rn) as u32).swap_bytes() as u64),
                Insn::Clz { sf, rd, rn } => {
                    let v = self.read(rn, sf);
                    let n = v.leading_zeros() - (64 - sf.bits());
                    self.write(rd, sf, n as u64)
                }
                Insn::Udiv { sf, rd, rn, rm } => {
                    let d = self.read(rm, sf);
                    let q = if d == 0 { 0 } else { self.read(rn, sf) / d };
                    self.write(rd, sf, q)
                }
                Insn::Msub { sf, rd, rn, rm, ra } => {
                    let p = self.read(rn, sf).wrapping_mul(self.read(rm, sf));
                    self.write(rd, sf, self.read(ra, sf).wrapping_sub(p))
                }
                Insn::Cset { rd, cond } => self.write(rd, W32, self.cond(cond) as u64),
                Insn::BCond { cond, offset } => {
                    if self.cond(cond) {
                        next = pc as i64 + offset as i64;
                    }
                }
                Insn::Cbz { sf, rt, nonzero, offset } => {
                    if (self.read(rt, sf) != 0) == nonzero {
                        next = pc as i64 + offset as i64;
                    }
                }
                Insn::Load { size, signed, rt, rn, imm, index } => {
                    let (addr, atype) = self.address(rn, imm, index)?;
                    let bytes = size.bytes();
                    let mut v = mem.read(atype, addr, bytes)?;
                    if signed {
                        v = sext(v, 8 * bytes as u32) as u64 & W32.mask();
                    }
                    self.write(rt, X64, v)
                }
                Insn::Store { size, rt, rn, imm, index } => {
                    let val = self.reg(rt);
                    let (addr, atype) = self.address(rn, imm, index)?;
                    mem.write(atype, addr, size.bytes(), val)?
                }
                Insn::Ret => return Ok(Exit::Return),
                Insn::Brk { imm } => return Ok(Exit::Break(imm)),
                Insn::Hint { imm } => self.hints.push(imm),
                Insn::Sentinel => return Err(runtime_err!(None, "executed the block sentinel at index {}", pc)),
            }
            pc = usize::try_from(next).map_err(|_| runtime_err!(None, "branch before the start of the block"))?;
        }
    }
    fn arith(&mut self, sf: Width, op: Arith, rd: Reg, a: u64, b: u64) {
        let (r, flags) = match op {
            Arith::Add | Arith::Adds => add_with_carry(sf, a, b, false),
            Arith::Sub | Arith::Subs => add_with_carry(sf, a, !b, true),
        };
        if matches!(op, Arith::Adds | Arith::Subs) {
            self.nzcv = flags;
        }
        self.write(rd, sf, r)
    }
    fn logic_flags(&mut self, sf: Width, r: u64) {
        self.nzcv = Nzcv {
            n: bit!(r, sf.bits() - 1),
            z: r == 0,
            c: false,
            v: false,
        };
    }
}
