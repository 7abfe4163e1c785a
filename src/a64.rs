//! AArch64 encoder for the symbolic host instructions.
use crate::backend::Backend;
use crate::insn::*;

fn rd(r: Reg) -> u32 { r.num() }
fn rn(r: Reg) -> u32 { r.num() << 5 }
fn rm(r: Reg) -> u32 { r.num() << 16 }

/// UBFM/SBFM/BFM: opc 0b10, 0b00, 0b01
fn bfm(sf: Width, opc: u32, d: Reg, n: Reg, immr: u32, imms: u32) -> u32 {
    let base = [0x1300_0000, 0x3300_0000, 0x5300_0000][opc as usize];
    base | sf.sf() << 31 | sf.sf() << 22 | immr << 16 | imms << 10 | rn(n) | rd(d)
}
const SBFM: u32 = 0;
const BFM: u32 = 1;
const UBFM: u32 = 2;

fn branch_imm(offset: i32, bits: u32) -> u32 { (offset as u32) & ((1 << bits) - 1) }

/// Encodes one instruction.
pub fn encode(insn: &Insn) -> u32 {
    use Insn::*;
    match *insn {
        Movz { sf, rd: d, imm, hw } => 0x5280_0000 | sf.sf() << 31 | (hw as u32) << 21 | (imm as u32) << 5 | rd(d),
        Movk { sf, rd: d, imm, hw } => 0x7280_0000 | sf.sf() << 31 | (hw as u32) << 21 | (imm as u32) << 5 | rd(d),
        Movn { sf, rd: d, imm, hw } => 0x1280_0000 | sf.sf() << 31 | (hw as u32) << 21 | (imm as u32) << 5 | rd(d),
        ArithImm { sf, op, rd: d, rn: n, imm } => {
            let base = [0x1100_0000, 0x3100_0000, 0x5100_0000, 0x7100_0000][op as usize];
            debug_assert!(imm < 0x1000);
            base | sf.sf() << 31 | (imm as u32 & 0xfff) << 10 | rn(n) | rd(d)
        }
        ArithReg { sf, op, rd: d, rn: n, rm: m, shift, amount } => {
            let base = [0x0b00_0000, 0x2b00_0000, 0x4b00_0000, 0x6b00_0000][op as usize];
            debug_assert!(shift != Shift::Ror);
            base | sf.sf() << 31 | (shift as u32) << 22 | rm(m) | (amount as u32) << 10 | rn(n) | rd(d)
        }
        LogicReg { sf, op, rd: d, rn: n, rm: m, shift, amount } => {
            let base = [0x0a00_0000, 0x0a20_0000, 0x2a00_0000, 0x2a20_0000, 0x4a00_0000, 0x6a00_0000][op as usize];
            base | sf.sf() << 31 | (shift as u32) << 22 | rm(m) | (amount as u32) << 10 | rn(n) | rd(d)
        }
        LogicImm { sf, op, rd: d, rn: n, ones, ror } => {
            let base = [0x1200_0000, 0x3200_0000, 0x5200_0000, 0x7200_0000][op as usize];
            debug_assert!(ones >= 1 && (ones as u32) < sf.bits() && (ror as u32) < sf.bits());
            base | sf.sf() << 31 | sf.sf() << 22 | (ror as u32) << 16 | (ones as u32 - 1) << 10 | rn(n) | rd(d)
        }
        ShiftImm { sf, op, rd: d, rn: n, amount } => {
            let size = sf.bits();
            let s = amount as u32;
            match op {
                Shift::Lsl => bfm(sf, UBFM, d, n, (size - s) % size, size - 1 - s),
                Shift::Lsr => bfm(sf, UBFM, d, n, s, size - 1),
                Shift::Asr => bfm(sf, SBFM, d, n, s, size - 1),
                // extr rd, rn, rn, #s
                Shift::Ror => 0x1380_0000 | sf.sf() << 31 | sf.sf() << 22 | rm(n) | s << 10 | rn(n) | rd(d),
            }
        }
        ShiftReg { sf, op, rd: d, rn: n, rm: m } => {
            0x1ac0_2000 | sf.sf() << 31 | (op as u32) << 10 | rm(m) | rn(n) | rd(d)
        }
        Bitfield { sf, op, rd: d, rn: n, lsb, width } => {
            let size = sf.bits();
            let (lsb, width) = (lsb as u32, width as u32);
            match op {
                BitfieldOp::Ubfx => bfm(sf, UBFM, d, n, lsb, lsb + width - 1),
                BitfieldOp::Sbfx => bfm(sf, SBFM, d, n, lsb, lsb + width - 1),
                BitfieldOp::Bfxil => bfm(sf, BFM, d, n, lsb, lsb + width - 1),
                BitfieldOp::Bfi => bfm(sf, BFM, d, n, (size - lsb) % size, width - 1),
            }
        }
        Rev { rd: d, rn: n } => 0x5ac0_0800 | rn(n) | rd(d),
        Clz { sf, rd: d, rn: n } => 0x5ac0_1000 | sf.sf() << 31 | rn(n) | rd(d),
        Udiv { sf, rd: d, rn: n, rm: m } => 0x1ac0_0800 | sf.sf() << 31 | rm(m) | rn(n) | rd(d),
        Msub { sf, rd: d, rn: n, rm: m, ra } => {
            0x1b00_8000 | sf.sf() << 31 | rm(m) | ra.num() << 10 | rn(n) | rd(d)
        }
        // csinc rd, wzr, wzr, !cond
        Cset { rd: d, cond } => {
            0x1a80_0400 | rm(Reg::ZR) | (cond.invert() as u32) << 12 | rn(Reg::ZR) | rd(d)
        }
        BCond { cond, offset } => 0x5400_0000 | branch_imm(offset, 19) << 5 | cond as u32,
        Cbz { sf, rt, nonzero, offset } => {
            0x3400_0000 | sf.sf() << 31 | (nonzero as u32) << 24 | branch_imm(offset, 19) << 5 | rd(rt)
        }
        Load { size, signed, rt, rn: n, imm, index } => {
            let opc = if signed { 0b11 } else { 0b01 };
            ldst(size, opc, rt, n, imm, index)
        }
        Store { size, rt, rn: n, imm, index } => ldst(size, 0b00, rt, n, imm, index),
        Ret => 0xd65f_03c0,
        Brk { imm } => 0xd420_0000 | (imm as u32) << 5,
        // hint #imm
        Hint { imm } => 0xd503_201f | (imm as u32 & 0x7f) << 5,
        Sentinel => 0xffff_ffff,
    }
}

/// LDUR/STUR and the pre/post-indexed forms with a 9-bit signed offset
fn ldst(size: MemSize, opc: u32, rt: Reg, n: Reg, imm: i16, index: Index) -> u32 {
    debug_assert!((-256..256).contains(&imm));
    let idx = match index {
        Index::Offset => 0b00,
        Index::Post => 0b01,
        Index::Pre => 0b11,
    };
    0x3800_0000 | (size as u32) << 30 | opc << 22 | (imm as u32 & 0x1ff) << 12 | idx << 10 | rn(n) | rd(rt)
}

/// Collects machine words.
#[derive(Default)]
pub struct A64 {
    words: Vec<u32>,
}
impl Backend for A64 {
    type Output = Vec<u32>;
    fn lower(&mut self, insn: &Insn) { self.words.push(encode(insn)) }
    fn finish(self) -> Vec<u32> { self.words }
}
/// host code bytes as they are placed in memory (little-endian instruction words)
pub fn to_bytes(words: &[u32]) -> Vec<u8> { words.iter().flat_map(|w| w.to_le_bytes()).collect() }
