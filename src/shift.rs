//! Shift and rotate handlers: ASL/ASR, LSL/LSR, ROXL/ROXR, ROL/ROR.
//!
//! Register forms work on the operand left-justified in a 64-bit host register, so any
//! count from 1 to 63 shifts bits out cleanly and the last bit out is still in reach for C.
use crate::block::{Cursor, Fixup};
use crate::ea;
use crate::insn::*;
use crate::jit::{Amount, Jit, Stream};
use crate::regalloc::Scratch;
use crate::registers::{CCBit, Flags};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    Left,
    Right,
}
impl Direction {
    pub fn of(opcode: u16) -> Direction {
        if opcode & 0x100 != 0 {
            Direction::Left
        } else {
            Direction::Right
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Kind {
    Arithmetic,
    Logical,
    RotateExtend,
    Rotate,
}

/// operand size in bits, bits 7-6 of a register shift
fn size_bits(opcode: u16) -> u8 { 8 << ((opcode >> 6) & 3) }

/// Count operand of a register-destination shift.
struct Count {
    n: Amount,
    skip: Option<Fixup>,
    _held: Option<Scratch>,
}

impl Count {
    /// Immediate counts of 0 mean 8. Register counts are taken modulo 64 and a zero count
    /// branches over the rest of the instruction, leaving the register and flags alone.
    fn decode(jit: &mut Jit, opcode: u16) -> Count {
        let field = ((opcode >> 9) & 7) as u8;
        if opcode & 0x20 == 0 {
            return Count {
                n: Amount::Imm(if field == 0 { 8 } else { field }),
                skip: None,
                _held: None,
            };
        }
        let src = jit.map(field);
        let cnt = jit.scratch();
        jit.emit(and_mask(W32, *cnt, src, 6));
        let skip = jit.forward(cbz(W32, *cnt));
        Count {
            n: Amount::Reg(*cnt),
            skip: Some(skip),
            _held: Some(cnt),
        }
    }
    /// the count less one, using `tmp` for register counts
    fn minus_one(&self, jit: &mut Jit, tmp: &Scratch) -> Amount {
        match self.n {
            Amount::Imm(n) => Amount::Imm(n - 1),
            Amount::Reg(r) => {
                jit.emit(sub_imm(W32, **tmp, r, 1));
                Amount::Reg(**tmp)
            }
        }
    }
    fn done(self, jit: &mut Jit) {
        if let Some(skip) = self.skip {
            jit.bind(skip);
        }
    }
}

/// writes the low `bits` of `res` into guest register `reg`, leaving the rest of it alone
fn insert(jit: &mut Jit, reg: Reg, res: Reg, bits: u8) {
    if bits == 32 {
        jit.emit(mov(W32, reg, res));
    } else {
        jit.emit(bfi(W32, reg, res, 0, bits));
    }
}

/// binds the destination and SR ahead of any conditional code
fn prepare(jit: &mut Jit, opcode: u16, mask: Flags, reads_x: bool) -> Reg {
    let dn = (opcode & 7) as u8;
    let reg = jit.map(dn);
    jit.mark_dirty(dn);
    if !mask.is_empty() {
        jit.modify_cc();
    } else if reads_x {
        jit.read_cc();
    }
    reg
}

pub fn emit_asx(jit: &mut Jit, opcode: u16, stream: &mut Stream) -> Cursor {
    emit_shift(jit, opcode, stream, Kind::Arithmetic)
}
pub fn emit_lsx(jit: &mut Jit, opcode: u16, stream: &mut Stream) -> Cursor {
    emit_shift(jit, opcode, stream, Kind::Logical)
}

fn emit_shift(jit: &mut Jit, opcode: u16, stream: &mut Stream, kind: Kind) -> Cursor {
    let dir = Direction::of(opcode);
    let bits = size_bits(opcode);
    let mask = jit.update_mask(stream);
    let reg = prepare(jit, opcode, mask, false);
    let count = Count::decode(jit, opcode);

    let l = jit.scratch();
    jit.emit(lsl(X64, *l, reg, 64 - bits));
    let n1 = jit.scratch();
    let before_last = count.minus_one(jit, &n1);
    let op = match (dir, kind) {
        (Direction::Left, _) => Shift::Lsl,
        (Direction::Right, Kind::Arithmetic) => Shift::Asr,
        (Direction::Right, _) => Shift::Lsr,
    };
    // t holds the operand shifted by all but the last step
    let t = jit.scratch();
    jit.shift(X64, op, *t, *l, before_last);
    let res = jit.scratch();
    let carry = match dir {
        Direction::Left => {
            jit.emit(lsr(X64, *res, *t, 63 - bits));
            (*res, bits)
        }
        Direction::Right => {
            jit.emit(shift_imm(X64, op, *res, *t, 65 - bits));
            (*t, 64 - bits)
        }
    };
    insert(jit, reg, *res, bits);

    if mask.intersects(Flags::N | Flags::Z) {
        jit.emit(cmn_lsl(*res, 32 - bits));
        jit.cc_nz_from_host(mask);
    }
    if mask.contains(Flags::V) {
        if kind == Kind::Arithmetic && dir == Direction::Left {
            // V: shifting back arithmetically does not restore the operand
            let v = jit.scratch();
            jit.emit(lsl(X64, *v, *t, 1));
            jit.shift(X64, Shift::Asr, *v, *v, count.n);
            jit.emit(cmp(X64, *v, *l));
            jit.cc_from_cond(CCBit::V, Cond::Ne);
        } else {
            jit.cc_clear(Flags::V);
        }
    }
    jit.cc_carry(mask, carry.0, carry.1, true);

    drop((l, n1, t, res));
    count.done(jit);
    jit.advance_pc(2);
    jit.cursor()
}

pub fn emit_rox(jit: &mut Jit, opcode: u16, stream: &mut Stream) -> Cursor {
    let dir = Direction::of(opcode);
    let bits = size_bits(opcode);
    let mask = jit.update_mask(stream);
    let reg = prepare(jit, opcode, mask, false);
    let count = Count::decode(jit, opcode);

    let t = jit.scratch();
    // narrow operands are replicated across the word so a 32-bit rotate rotates them
    let src = if bits == 32 {
        reg
    } else {
        jit.emit(and_mask(W32, *t, reg, bits));
        jit.emit(orr(W32, *t, *t, *t, Shift::Lsl, bits));
        if bits == 8 {
            jit.emit(orr(W32, *t, *t, *t, Shift::Lsl, 16));
        }
        *t
    };
    match (count.n, dir) {
        (Amount::Imm(n), Direction::Right) => {
            jit.emit(ror(W32, *t, src, n));
        }
        (Amount::Imm(n), Direction::Left) => {
            jit.emit(ror(W32, *t, src, 32 - n));
        }
        (Amount::Reg(c), Direction::Right) => {
            jit.emit(shift_reg(W32, Shift::Ror, *t, src, c));
        }
        (Amount::Reg(c), Direction::Left) => {
            let neg_c = jit.scratch();
            jit.emit(neg(W32, *neg_c, c));
            jit.emit(shift_reg(W32, Shift::Ror, *t, src, *neg_c));
        }
    }
    insert(jit, reg, *t, bits);

    if mask.intersects(Flags::N | Flags::Z) {
        jit.emit(cmn_lsl(*t, 32 - bits));
        jit.cc_nz_from_host(mask);
    }
    jit.cc_clear(mask & Flags::V);
    let carry_bit = match dir {
        Direction::Left => 0,
        Direction::Right => bits - 1,
    };
    jit.cc_carry(mask, *t, carry_bit, false);

    drop(t);
    count.done(jit);
    jit.advance_pc(2);
    jit.cursor()
}

pub fn emit_roxx(jit: &mut Jit, opcode: u16, stream: &mut Stream) -> Cursor {
    let dir = Direction::of(opcode);
    let bits = size_bits(opcode);
    let ring_bits = bits + 1;
    let mask = jit.update_mask(stream);
    let reg = prepare(jit, opcode, mask, true);
    let cc = jit.read_cc();
    let count = Count::decode(jit, opcode);

    // the rotation runs over bits + 1 positions
    let k_reg = jit.scratch();
    let k = match count.n {
        Amount::Imm(n) => Amount::Imm(n),
        Amount::Reg(c) => {
            let m = jit.scratch();
            jit.emit(movz(W32, *m, ring_bits as u16, 0));
            jit.emit(udiv(*k_reg, c, *m));
            jit.emit(msub(*k_reg, *k_reg, *m, c));
            Amount::Reg(*k_reg)
        }
    };
    // ring = X:operand
    let ring = jit.scratch();
    jit.emit(ubfx(X64, *ring, reg, 0, bits));
    let x = jit.scratch();
    jit.emit(lsr(W32, *x, cc, CCBit::X as u8));
    jit.emit(bfi(X64, *ring, *x, bits, 1));

    let (first, second) = match dir {
        Direction::Left => (Shift::Lsl, Shift::Lsr),
        Direction::Right => (Shift::Lsr, Shift::Lsl),
    };
    let a = jit.scratch();
    let b = jit.scratch();
    match k {
        Amount::Imm(k) => {
            jit.emit(shift_imm(X64, first, *a, *ring, k));
            jit.emit(shift_imm(X64, second, *b, *ring, ring_bits - k));
        }
        Amount::Reg(k) => {
            jit.emit(neg(W32, *x, k));
            jit.emit(add_imm(W32, *x, *x, ring_bits as u16));
            jit.emit(shift_reg(X64, first, *a, *ring, k));
            jit.emit(shift_reg(X64, second, *b, *ring, *x));
        }
    }
    // bits above the ring hold leftovers; only bits 0..=bits are used below
    jit.emit(orr(X64, *a, *a, *b, Shift::Lsl, 0));
    insert(jit, reg, *a, bits);

    if mask.intersects(Flags::N | Flags::Z) {
        jit.emit(cmn_lsl(*a, 32 - bits));
        jit.cc_nz_from_host(mask);
    }
    jit.cc_clear(mask & Flags::V);
    jit.cc_carry(mask, *a, bits, true);

    drop((k_reg, ring, x, a, b));
    count.done(jit);
    jit.advance_pc(2);
    jit.cursor()
}

pub fn emit_asx_mem(jit: &mut Jit, opcode: u16, stream: &mut Stream) -> Cursor {
    emit_memory(jit, opcode, stream, Kind::Arithmetic)
}
pub fn emit_lsx_mem(jit: &mut Jit, opcode: u16, stream: &mut Stream) -> Cursor {
    emit_memory(jit, opcode, stream, Kind::Logical)
}
pub fn emit_roxx_mem(jit: &mut Jit, opcode: u16, stream: &mut Stream) -> Cursor {
    emit_memory(jit, opcode, stream, Kind::RotateExtend)
}
pub fn emit_rox_mem(jit: &mut Jit, opcode: u16, stream: &mut Stream) -> Cursor {
    emit_memory(jit, opcode, stream, Kind::Rotate)
}

/// Word operand in memory, shifted by one.
fn emit_memory(jit: &mut Jit, opcode: u16, stream: &mut Stream, kind: Kind) -> Cursor {
    let dir = Direction::of(opcode);
    let mask = jit.update_mask(stream);
    let mode_reg = (opcode & 0x3f) as u8;
    if !mask.is_empty() {
        jit.modify_cc();
    }
    let (ea, ext) = ea::resolve(jit, mode_reg, stream, 2);
    stream.skip(ext as usize);
    let (mode, _) = ea::split(mode_reg);

    let v = jit.scratch();
    let (offset, index) = if mode == 4 { (-2, Index::Pre) } else { (0, Index::Offset) };
    if kind == Kind::Arithmetic && dir == Direction::Right {
        jit.emit(ldrs(MemSize::H, *v, ea.reg(), offset, index));
    } else {
        jit.emit(ldr(MemSize::H, *v, ea.reg(), offset, index));
    }

    let res = jit.scratch();
    let carry = match (kind, dir) {
        (Kind::Arithmetic | Kind::Logical, Direction::Left) => {
            jit.emit(lsl(W32, *res, *v, 1));
            (*res, 16)
        }
        (Kind::Arithmetic, Direction::Right) => {
            jit.emit(shift_imm(W32, Shift::Asr, *res, *v, 1));
            (*v, 0)
        }
        (Kind::Logical, Direction::Right) => {
            jit.emit(lsr(W32, *res, *v, 1));
            (*v, 0)
        }
        (Kind::Rotate, _) => {
            jit.emit(orr(W32, *res, *v, *v, Shift::Lsl, 16));
            if dir == Direction::Left {
                jit.emit(ror(W32, *res, *res, 31));
                (*res, 0)
            } else {
                jit.emit(ror(W32, *res, *res, 1));
                (*res, 15)
            }
        }
        (Kind::RotateExtend, _) => {
            let cc = jit.read_cc();
            let x = jit.scratch();
            jit.emit(lsr(W32, *x, cc, CCBit::X as u8));
            if dir == Direction::Left {
                jit.emit(lsl(W32, *res, *v, 1));
                jit.emit(bfi(W32, *res, *x, 0, 1));
                (*res, 16)
            } else {
                jit.emit(lsr(W32, *res, *v, 1));
                jit.emit(bfi(W32, *res, *x, 15, 1));
                (*v, 0)
            }
        }
    };
    if mode == 3 {
        jit.emit(store(MemSize::H, *res, ea.reg(), 2, Index::Post));
    } else {
        jit.emit(store(MemSize::H, *res, ea.reg(), 0, Index::Offset));
    }

    if mask.intersects(Flags::N | Flags::Z) {
        jit.emit(cmn_lsl(*res, 16));
        jit.cc_nz_from_host(mask);
    }
    if mask.contains(Flags::V) {
        if kind == Kind::Arithmetic && dir == Direction::Left {
            let t = jit.scratch();
            jit.emit(eor(W32, *t, *v, *v, Shift::Lsl, 1));
            jit.cc_from_bit(CCBit::V, *t, 15);
        } else {
            jit.cc_clear(Flags::V);
        }
    }
    jit.cc_carry(mask, carry.0, carry.1, kind != Kind::Rotate);

    jit.advance_pc(2 * (ext as u32 + 1));
    jit.cursor()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::HostCpu;
    use crate::jit::Options;
    use crate::memory::{AccessType, Memory};
    use crate::Error;

    const CTX: u32 = 0x3000;

    /// translates one instruction with every flag live and runs it on `d`
    fn run(words: &[u16], d: [u32; 8], sr: u16) -> Result<([u32; 8], u16, Memory), Error> {
        let mut mem = Memory::new(0x4000);
        for (i, v) in d.iter().enumerate() {
            mem.write_u32(AccessType::System, CTX + 4 * i as u32, *v)?;
        }
        mem.write_u32(AccessType::System, CTX + 32, 0x2002)?;
        mem.write_u32(AccessType::System, CTX + 68, sr as u32)?;
        mem.write(AccessType::System, 0x2000, 2, 0x8001)?;
        let opts = Options {
            liveness: false,
            max_block: 1,
        };
        let mut jit = Jit::new(0x1000, opts);
        let mut stream = Stream::new(words, 0x1000);
        stream.mark();
        let op = stream.read();
        jit.begin_insn();
        match op & 0xf0c0 {
            0xe0c0 => match (op >> 9) & 3 {
                0 => emit_asx_mem(&mut jit, op, &mut stream),
                1 => emit_lsx_mem(&mut jit, op, &mut stream),
                2 => emit_roxx_mem(&mut jit, op, &mut stream),
                _ => emit_rox_mem(&mut jit, op, &mut stream),
            },
            _ => match (op >> 3) & 3 {
                0 => emit_asx(&mut jit, op, &mut stream),
                1 => emit_lsx(&mut jit, op, &mut stream),
                2 => emit_roxx(&mut jit, op, &mut stream),
                _ => emit_rox(&mut jit, op, &mut stream),
            },
        };
        assert_eq!(jit.scratch_in_use(), 0);
        let block = jit.finish();
        let mut cpu = HostCpu::new();
        cpu.x[Reg::CTX.0 as usize] = CTX as u64;
        cpu.run(block.code(), &mut mem)?;
        let mut out = [0; 8];
        for (i, v) in out.iter_mut().enumerate() {
            *v = mem.read_u32(AccessType::System, CTX + 4 * i as u32)?;
        }
        let sr = mem.read_u32(AccessType::System, CTX + 68)? as u16;
        Ok((out, sr, mem))
    }

    #[test]
    fn lsl_word_immediate() -> Result<(), Error> {
        // lsl.w #3,d0
        let (d, sr, _) = run(&[0xe748], [0x1234_5678, 0, 0, 0, 0, 0, 0, 0], 0)?;
        assert_eq!(d[0], 0x1234_b3c0);
        assert_eq!(sr & 0x1f, 0x08);
        Ok(())
    }
    #[test]
    fn asl_overflow_and_carry() -> Result<(), Error> {
        // asl.b #1,d1 on 0x80: result 0, C = X = 1, V = 1, Z = 1
        let (d, sr, _) = run(&[0xe301], [0, 0x80, 0, 0, 0, 0, 0, 0], 0)?;
        assert_eq!(d[1], 0);
        assert_eq!(sr & 0x1f, 0x17);
        Ok(())
    }
    #[test]
    fn asr_long_by_register() -> Result<(), Error> {
        // asr.l d2,d0 with d2 = 40: sign fill, C = X = sign
        let (d, sr, _) = run(&[0xe4a0], [0x8000_0000, 0, 40, 0, 0, 0, 0, 0], 0)?;
        assert_eq!(d[0], 0xffff_ffff);
        assert_eq!(sr & 0x1f, 0x19);
        Ok(())
    }
    #[test]
    fn zero_register_count_changes_nothing() -> Result<(), Error> {
        // lsr.l d2,d0 with d2 = 64 (masked to 0), and roxl.w d2,d0
        for op in [0xe4a8, 0xe570] {
            let (d, sr, _) = run(&[op], [0x1234_5678, 0, 64, 0, 0, 0, 0, 0], 0x1f)?;
            assert_eq!(d[0], 0x1234_5678);
            assert_eq!(sr, 0x1f);
        }
        Ok(())
    }
    #[test]
    fn rotates() -> Result<(), Error> {
        // ror.w #8,d0 then rol.b #1,d0
        let (d, sr, _) = run(&[0xe058], [0xaaaa_1280, 0, 0, 0, 0, 0, 0, 0], 0x10)?;
        assert_eq!(d[0], 0xaaaa_8012);
        assert_eq!(sr & 0x1f, 0x19);
        let (d, sr, _) = run(&[0xe318], [0x80, 0, 0, 0, 0, 0, 0, 0], 0)?;
        assert_eq!(d[0], 0x01);
        assert_eq!(sr & 0x1f, 0x01);
        Ok(())
    }
    #[test]
    fn rotate_through_extend() -> Result<(), Error> {
        // roxl.b #1,d0 with X set: 0x80 -> 0x01, C = X = 1
        let (d, sr, _) = run(&[0xe310], [0x80, 0, 0, 0, 0, 0, 0, 0], 0x10)?;
        assert_eq!(d[0], 0x01);
        assert_eq!(sr & 0x1f, 0x11);
        // roxr.w d2,d0 with d2 = 17 is a full ring turn
        let (d, sr, _) = run(&[0xe470], [0x1234, 0, 17, 0, 0, 0, 0, 0], 0x10)?;
        assert_eq!(d[0], 0x1234);
        assert_eq!(sr & 0x1f, 0x11);
        Ok(())
    }
    #[test]
    fn memory_forms() -> Result<(), Error> {
        // asr.w -(a0): 0x8001 -> 0xc000, C = X = 1, N = 1
        let (_, sr, mem) = run(&[0xe0e0], [0; 8], 0)?;
        assert_eq!(mem.read_u16(AccessType::System, 0x2000)?, 0xc000);
        assert_eq!(mem.read_u32(AccessType::System, CTX + 32)?, 0x2000);
        assert_eq!(sr & 0x1f, 0x19);
        // rol.w abs.w
        let (_, sr, mem) = run(&[0xe7f8, 0x2000], [0; 8], 0)?;
        assert_eq!(mem.read_u16(AccessType::System, 0x2000)?, 0x0003);
        assert_eq!(sr & 0x1f, 0x01);
        Ok(())
    }
}
